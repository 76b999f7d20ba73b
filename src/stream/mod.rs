//! Instruction-stream model: operations, jump-target markers, and the
//! per-routine stream they live in.

mod body;
mod errors;
mod op;

pub use body::InstructionStream;
pub use errors::StreamError;
pub use op::{FieldId, Label, Op, Opcode, Operand, RoutineId};
