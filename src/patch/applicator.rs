//! Descriptor application: resolve, assert, splice.
//!
//! A descriptor goes `Pending -> Resolving -> {Applied | Aborted(HostDrift)
//! | Aborted(InternalInconsistency)}`; terminal states are final and a
//! descriptor is never retried. Host drift (anchor unresolvable, or the
//! expected shape no longer present) skips exactly that descriptor and the
//! batch continues; an internal inconsistency is a descriptor-construction
//! bug and aborts the remainder of the batch for that routine.
//!
//! Batches are applied in the order the caller supplies. The shipped
//! convention is descending anchor position, so earlier edits never
//! invalidate the positions later descriptors are about to resolve.

use crate::locate::{Anchor, ShapeCheck};
use crate::patch::payload::{Payload, PayloadError};
use crate::splice::{Splice, SpliceError};
use crate::stream::{InstructionStream, RoutineId};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Where the payload lands relative to the resolved anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Splice in at the anchor; the anchored operation shifts right and its
    /// markers move to the head of the payload.
    InsertBefore,
    /// Splice in immediately after the anchored operation.
    InsertAfter,
    /// Remove `removed` operations starting at the anchor, splice the
    /// payload in their place.
    Replace { removed: usize },
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditMode::InsertBefore => write!(f, "insert-before"),
            EditMode::InsertAfter => write!(f, "insert-after"),
            EditMode::Replace { removed } => write!(f, "replace {removed}"),
        }
    }
}

/// A declarative record of one intended edit.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchDescriptor {
    pub id: String,
    pub routine: RoutineId,
    pub anchor: Anchor,
    pub expect: ShapeCheck,
    pub mode: EditMode,
    pub payload: Payload,
}

/// Diagnostic for a routine whose compiled shape no longer matches a patch's
/// assumptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDrift {
    pub routine: RoutineId,
    pub descriptor: String,
    /// Resolved anchor position, when resolution itself succeeded.
    pub position: Option<usize>,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for HostDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host drift in {} (descriptor '{}'): expected {}, found {}",
            self.routine, self.descriptor, self.expected, self.found
        )?;
        if let Some(position) = self.position {
            write!(f, " at position {position}")?;
        }
        Ok(())
    }
}

/// Terminal state of one descriptor.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "PatchOutcome should be checked for applied/skipped"]
pub enum PatchOutcome {
    /// The edit was spliced into the stream.
    Applied {
        position: usize,
        inserted: usize,
        removed: usize,
    },
    /// The host's shape no longer matches; the descriptor was skipped and
    /// the stream is untouched by it.
    SkippedDrift(HostDrift),
    /// The batch's host range does not cover the running host.
    SkippedVersion { reason: String },
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::Applied {
                position,
                inserted,
                removed,
            } => write!(
                f,
                "applied at position {position} (+{inserted} ops, -{removed} ops)"
            ),
            PatchOutcome::SkippedDrift(drift) => write!(f, "skipped: {drift}"),
            PatchOutcome::SkippedVersion { reason } => write!(f, "skipped (host version): {reason}"),
        }
    }
}

/// Fatal descriptor failures: bugs in descriptor construction, not host
/// drift. These abort the remainder of the batch for the routine.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("descriptor targets routine {expected} but the stream holds {found}")]
    RoutineMismatch { expected: RoutineId, found: RoutineId },

    #[error("internal inconsistency while splicing: {0}")]
    Inconsistency(#[from] SpliceError),

    #[error("malformed payload: {0}")]
    Payload(#[from] PayloadError),
}

/// Apply one descriptor to the routine's live stream.
pub fn apply_one(
    stream: &mut InstructionStream,
    descriptor: &PatchDescriptor,
) -> Result<PatchOutcome, ApplyError> {
    if stream.routine() != &descriptor.routine {
        return Err(ApplyError::RoutineMismatch {
            expected: descriptor.routine.clone(),
            found: stream.routine().clone(),
        });
    }

    let anchor_position = match descriptor.anchor.resolve(stream) {
        Ok(position) => position,
        Err(err) => {
            let drift = HostDrift {
                routine: descriptor.routine.clone(),
                descriptor: descriptor.id.clone(),
                position: None,
                expected: descriptor.anchor.to_string(),
                found: err.to_string(),
            };
            warn!(descriptor = %descriptor.id, routine = %descriptor.routine, "{drift}");
            return Ok(PatchOutcome::SkippedDrift(drift));
        }
    };

    if let Err(mismatch) = descriptor.expect.check(stream, anchor_position) {
        let drift = HostDrift {
            routine: descriptor.routine.clone(),
            descriptor: descriptor.id.clone(),
            position: Some(anchor_position),
            expected: mismatch.expected,
            found: mismatch.found,
        };
        warn!(descriptor = %descriptor.id, routine = %descriptor.routine, "{drift}");
        return Ok(PatchOutcome::SkippedDrift(drift));
    }

    let ops = descriptor.payload.resolve(stream)?;
    let splice = match descriptor.mode {
        EditMode::InsertBefore => Splice::insert(anchor_position, ops),
        EditMode::InsertAfter => Splice::insert(anchor_position + 1, ops),
        EditMode::Replace { removed } => Splice::replace(anchor_position, removed, ops),
    };
    let position = splice.at;
    let receipt = splice.apply(stream)?;

    debug!(
        descriptor = %descriptor.id,
        routine = %descriptor.routine,
        position,
        inserted = receipt.inserted,
        removed = receipt.removed,
        relocated = receipt.relocated,
        "patch applied"
    );
    Ok(PatchOutcome::Applied {
        position,
        inserted: receipt.inserted,
        removed: receipt.removed,
    })
}

/// Apply a batch of descriptors to one routine, in the supplied order.
///
/// Stops at the first [`ApplyError`]; completed entries and the failing one
/// are returned, the rest of the batch is not attempted.
pub fn apply_batch(
    stream: &mut InstructionStream,
    descriptors: &[PatchDescriptor],
) -> Vec<(String, Result<PatchOutcome, ApplyError>)> {
    let mut results = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let result = apply_one(stream, descriptor);
        let failed = result.is_err();
        if failed {
            error!(
                descriptor = %descriptor.id,
                routine = %descriptor.routine,
                "aborting batch after internal inconsistency"
            );
        }
        results.push((descriptor.id.clone(), result));
        if failed {
            break;
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::payload::PayloadOp;
    use crate::stream::{Op, Opcode};

    fn command_stream() -> InstructionStream {
        InstructionStream::new(
            "Game::chat_parse_command",
            vec![
                Op::load_arg(1),
                Op::call("String::to_lower"),
                Op::store_local(2),
                Op::load_local(2),
                Op::call("Chat::dispatch"),
                Op::ret(),
            ],
        )
        .unwrap()
    }

    fn guarded_descriptor() -> PatchDescriptor {
        PatchDescriptor {
            id: "chat-command-hook".into(),
            routine: "Game::chat_parse_command".into(),
            anchor: Anchor::call_to("String::to_lower"),
            expect: ShapeCheck::Opcode(Opcode::Call),
            mode: EditMode::InsertAfter,
            payload: Payload::new(vec![
                PayloadOp::load_local(2),
                PayloadOp::call("Hooks::in_chat_parse_command"),
                PayloadOp::jump_if_false("resume"),
                PayloadOp::ret(),
                PayloadOp::nop().marked("resume"),
            ]),
        }
    }

    #[test]
    fn descriptor_applies_after_call() {
        let mut stream = command_stream();
        let outcome = apply_one(&mut stream, &guarded_descriptor()).unwrap();

        assert_eq!(
            outcome,
            PatchOutcome::Applied {
                position: 2,
                inserted: 5,
                removed: 0
            }
        );
        assert_eq!(stream.len(), 11);
        assert_eq!(stream.op_at(2).unwrap().opcode, Opcode::LoadLocal);
        assert_eq!(stream.op_at(4).unwrap().opcode, Opcode::JumpIfFalse);
        // The inserted branch resolves to the inserted nop.
        let target = stream.op_at(4).unwrap().branch_target().unwrap();
        assert_eq!(stream.position_of_label(target), Some(6));
    }

    #[test]
    fn drift_on_expectation_leaves_stream_untouched() {
        let mut stream = command_stream();
        let before = stream.clone();
        let mut descriptor = guarded_descriptor();
        descriptor.expect = ShapeCheck::Opcode(Opcode::Return);

        let outcome = apply_one(&mut stream, &descriptor).unwrap();

        match outcome {
            PatchOutcome::SkippedDrift(drift) => {
                assert_eq!(drift.position, Some(1));
                assert_eq!(drift.expected, "return");
                assert_eq!(drift.found, "call");
            }
            other => panic!("expected drift, got {other}"),
        }
        assert_eq!(stream, before);
    }

    #[test]
    fn drift_on_missing_anchor_reports_unresolved() {
        let mut stream = command_stream();
        let mut descriptor = guarded_descriptor();
        descriptor.anchor = Anchor::call_to("Game::removed_in_update");

        let outcome = apply_one(&mut stream, &descriptor).unwrap();
        match outcome {
            PatchOutcome::SkippedDrift(drift) => {
                assert_eq!(drift.position, None);
                assert!(drift.found.contains("no call to"));
            }
            other => panic!("expected drift, got {other}"),
        }
    }

    #[test]
    fn routine_mismatch_is_fatal() {
        let mut stream = InstructionStream::new("Game::other", vec![Op::ret()]).unwrap();
        let err = apply_one(&mut stream, &guarded_descriptor()).unwrap_err();
        assert!(matches!(err, ApplyError::RoutineMismatch { .. }));
    }

    #[test]
    fn batch_applies_in_descending_order() {
        // Two inserts at positions 4 and 1, highest first: the anchor of the
        // second descriptor is still valid after the first edit.
        let mut stream = command_stream();
        let batch = vec![
            PatchDescriptor {
                id: "late".into(),
                routine: "Game::chat_parse_command".into(),
                anchor: Anchor::at(4),
                expect: ShapeCheck::Opcode(Opcode::Call),
                mode: EditMode::InsertBefore,
                payload: Payload::new(vec![PayloadOp::nop(), PayloadOp::nop()]),
            },
            PatchDescriptor {
                id: "early".into(),
                routine: "Game::chat_parse_command".into(),
                anchor: Anchor::at(1),
                expect: ShapeCheck::Opcode(Opcode::Call),
                mode: EditMode::InsertBefore,
                payload: Payload::new(vec![PayloadOp::nop()]),
            },
        ];

        let results = apply_batch(&mut stream, &batch);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(stream.len(), 9);
        // Original op 0 still directly precedes the block inserted at 1.
        assert_eq!(stream.op_at(0).unwrap().opcode, Opcode::LoadArg);
        assert_eq!(stream.op_at(1).unwrap().opcode, Opcode::Nop);
        // Original op 3 still directly precedes the block inserted at 4.
        assert_eq!(stream.op_at(4).unwrap().opcode, Opcode::LoadLocal);
        assert_eq!(stream.op_at(5).unwrap().opcode, Opcode::Nop);
        assert_eq!(stream.op_at(7).unwrap().opcode, Opcode::Call);
    }

    #[test]
    fn batch_aborts_after_inconsistency() {
        use crate::stream::Label;
        // The final return carries a marker; removing it with an empty
        // payload leaves the marker nowhere to go.
        let l = Label::from_raw(0);
        let mut stream = InstructionStream::new(
            "Game::chat_parse_command",
            vec![Op::load_const(1), Op::jump(l), Op::ret().with_label(l)],
        )
        .unwrap();

        let batch = vec![
            PatchDescriptor {
                id: "bad-replace".into(),
                routine: "Game::chat_parse_command".into(),
                anchor: Anchor::at(2),
                expect: ShapeCheck::Opcode(Opcode::Return),
                mode: EditMode::Replace { removed: 1 },
                payload: Payload::default(),
            },
            PatchDescriptor {
                id: "never-reached".into(),
                routine: "Game::chat_parse_command".into(),
                anchor: Anchor::at(0),
                expect: ShapeCheck::Opcode(Opcode::LoadConst),
                mode: EditMode::InsertBefore,
                payload: Payload::new(vec![PayloadOp::nop()]),
            },
        ];

        let results = apply_batch(&mut stream, &batch);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "bad-replace");
        assert!(matches!(results[0].1, Err(ApplyError::Inconsistency(_))));
        assert_eq!(stream.len(), 3);
    }

    #[test]
    fn drift_does_not_abort_batch() {
        let mut stream = command_stream();
        let mut drifted = guarded_descriptor();
        drifted.id = "drifted".into();
        drifted.expect = ShapeCheck::Opcode(Opcode::Nop);
        let fine = PatchDescriptor {
            id: "fine".into(),
            routine: "Game::chat_parse_command".into(),
            anchor: Anchor::at(0),
            expect: ShapeCheck::Opcode(Opcode::LoadArg),
            mode: EditMode::InsertBefore,
            payload: Payload::new(vec![PayloadOp::nop()]),
        };

        let results = apply_batch(&mut stream, &[drifted, fine]);
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0].1,
            Ok(PatchOutcome::SkippedDrift(_))
        ));
        assert!(matches!(results[1].1, Ok(PatchOutcome::Applied { .. })));
    }
}
