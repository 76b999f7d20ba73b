use crate::stream::op::{Label, Opcode};
use thiserror::Error;

/// Malformed routine body detected while constructing a stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("operand kind '{found}' does not fit opcode '{opcode}' at position {position}")]
    OperandMismatch {
        position: usize,
        opcode: Opcode,
        found: &'static str,
    },

    #[error("label {label} is attached to more than one operation")]
    DuplicateLabel { label: Label },

    #[error("branch at position {position} targets label {label}, which no operation carries")]
    UnboundTarget { position: usize, label: Label },
}
