//! Patch descriptors, declarative patch files, and the startup registry.

pub mod applicator;
pub mod loader;
pub mod payload;
pub mod registry;
pub mod schema;
pub mod version;

pub use applicator::{
    apply_batch, apply_one, ApplyError, EditMode, HostDrift, PatchDescriptor, PatchOutcome,
};
pub use loader::{load_from_path, load_from_str, PatchFileError};
pub use payload::{Payload, PayloadError, PayloadOp, PayloadOperand};
pub use registry::{BatchReport, BatchStatus, PatchBatch, PatchRegistry, StartupReport};
pub use schema::{
    AnchorSpec, ExpectSpec, Metadata, ModeSpec, OpSpec, PatchEntry, PatchFile, ValidationError,
    ValidationIssue,
};
pub use version::{matches_host, parse_host_range, parse_host_version, VersionError};
