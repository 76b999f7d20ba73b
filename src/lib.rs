//! Method Patcher: method-body patch engine for precompiled hosts
//!
//! Extends a closed, pre-compiled host application's routines with injected
//! behavior, without recompiling or relinking the host. Patches work on the
//! decompiled instruction stream of a routine: locate a position, assert the
//! routine still has the expected shape, and splice operations in, keeping
//! every jump-target marker attached to the right operation.
//!
//! # Architecture
//!
//! All edit operations compile down to a single primitive: [`Splice`], a
//! verified span replacement on an [`InstructionStream`]. Intelligence lives
//! in anchor resolution and shape checking ([`locate`]), not in the
//! application logic. [`PatchDescriptor`]s package anchor, assertion, edit
//! mode, and payload declaratively; the [`PatchRegistry`] applies every
//! registered batch exactly once at startup.
//!
//! # Safety
//!
//! - Every descriptor asserts the expected opcode shape before mutating
//! - Host drift (shape mismatch) skips that one descriptor and is reported
//! - Jump-target markers are conserved by every edit; an edit that would
//!   orphan a marker fails loudly and leaves the stream unmodified
//! - Batches apply in caller order; descending anchor positions keep earlier
//!   edits from invalidating later anchors
//!
//! # Example
//!
//! ```
//! use method_patcher::inject;
//! use method_patcher::locate::{Anchor, ShapeCheck};
//! use method_patcher::patch::{apply_one, EditMode, PatchDescriptor, PayloadOp};
//! use method_patcher::stream::{InstructionStream, Op, Opcode};
//!
//! let mut stream = InstructionStream::new(
//!     "Game::chat_parse_command",
//!     vec![
//!         Op::load_arg(1),
//!         Op::call("String::to_lower"),
//!         Op::store_local(2),
//!         Op::ret(),
//!     ],
//! )?;
//!
//! let descriptor = PatchDescriptor {
//!     id: "chat-command-hook".into(),
//!     routine: "Game::chat_parse_command".into(),
//!     anchor: Anchor::call_to("String::to_lower").shifted(1),
//!     expect: ShapeCheck::Opcode(Opcode::StoreLocal),
//!     mode: EditMode::InsertAfter,
//!     payload: inject::guarded_early_return(
//!         "Hooks::in_chat_parse_command",
//!         vec![PayloadOp::load_local(2)],
//!     ),
//! };
//!
//! let outcome = apply_one(&mut stream, &descriptor)?;
//! println!("{outcome}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod inject;
pub mod locate;
pub mod patch;
pub mod splice;
pub mod stream;

// Re-exports
pub use locate::{find_call, Anchor, AnchorBase, LocateError, ShapeCheck, ShapeMismatch};
pub use patch::{
    apply_batch, apply_one, load_from_path, load_from_str, ApplyError, EditMode, HostDrift,
    PatchBatch, PatchDescriptor, PatchFile, PatchFileError, PatchOutcome, PatchRegistry, Payload,
    PayloadError, PayloadOp, StartupReport, VersionError,
};
pub use splice::{Splice, SpliceError, SpliceReceipt};
pub use stream::{FieldId, InstructionStream, Label, Op, Opcode, Operand, RoutineId, StreamError};
