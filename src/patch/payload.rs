//! Payload op templates.
//!
//! A descriptor's payload cannot carry finished [`Op`]s when it introduces
//! its own control flow: fresh jump-target markers must come from the target
//! stream's allocator, and the stream does not exist when descriptors are
//! declared. Payload ops therefore reference branch destinations by symbolic
//! mark; resolution against the live stream mints one label per mark and
//! rewrites the references.

use crate::stream::{FieldId, InstructionStream, Label, Op, Opcode, Operand, RoutineId};
use std::collections::HashMap;
use thiserror::Error;

/// Operand of a payload op: concrete, or a symbolic branch destination.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadOperand {
    Concrete(Operand),
    Mark(String),
}

/// One operation template inside a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadOp {
    pub opcode: Opcode,
    pub operand: PayloadOperand,
    /// Symbolic mark this op will carry as a label once resolved.
    pub mark: Option<String>,
    /// Pre-minted labels to carry through unchanged.
    pub labels: Vec<Label>,
}

impl PayloadOp {
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        PayloadOp {
            opcode,
            operand: PayloadOperand::Concrete(operand),
            mark: None,
            labels: Vec::new(),
        }
    }

    pub fn nop() -> Self {
        PayloadOp::new(Opcode::Nop, Operand::None)
    }

    pub fn load_const(value: i64) -> Self {
        PayloadOp::new(Opcode::LoadConst, Operand::Int(value))
    }

    pub fn load_local(index: u16) -> Self {
        PayloadOp::new(Opcode::LoadLocal, Operand::Local(index))
    }

    pub fn store_local(index: u16) -> Self {
        PayloadOp::new(Opcode::StoreLocal, Operand::Local(index))
    }

    pub fn load_arg(index: u16) -> Self {
        PayloadOp::new(Opcode::LoadArg, Operand::Arg(index))
    }

    pub fn load_field(field: impl Into<FieldId>) -> Self {
        PayloadOp::new(Opcode::LoadField, Operand::Field(field.into()))
    }

    pub fn store_field(field: impl Into<FieldId>) -> Self {
        PayloadOp::new(Opcode::StoreField, Operand::Field(field.into()))
    }

    pub fn add() -> Self {
        PayloadOp::new(Opcode::Add, Operand::None)
    }

    pub fn sub() -> Self {
        PayloadOp::new(Opcode::Sub, Operand::None)
    }

    pub fn pop() -> Self {
        PayloadOp::new(Opcode::Pop, Operand::None)
    }

    pub fn dup() -> Self {
        PayloadOp::new(Opcode::Dup, Operand::None)
    }

    pub fn call(routine: impl Into<RoutineId>) -> Self {
        PayloadOp::new(Opcode::Call, Operand::Routine(routine.into()))
    }

    pub fn jump(target: impl Into<String>) -> Self {
        PayloadOp {
            opcode: Opcode::Jump,
            operand: PayloadOperand::Mark(target.into()),
            mark: None,
            labels: Vec::new(),
        }
    }

    pub fn jump_if_true(target: impl Into<String>) -> Self {
        PayloadOp {
            opcode: Opcode::JumpIfTrue,
            operand: PayloadOperand::Mark(target.into()),
            mark: None,
            labels: Vec::new(),
        }
    }

    pub fn jump_if_false(target: impl Into<String>) -> Self {
        PayloadOp {
            opcode: Opcode::JumpIfFalse,
            operand: PayloadOperand::Mark(target.into()),
            mark: None,
            labels: Vec::new(),
        }
    }

    pub fn ret() -> Self {
        PayloadOp::new(Opcode::Return, Operand::None)
    }

    /// Declare this op as the destination named `mark`.
    pub fn marked(mut self, mark: impl Into<String>) -> Self {
        self.mark = Some(mark.into());
        self
    }

    /// Carry a label minted earlier against the same stream.
    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }
}

/// The ordered sequence of operations a descriptor injects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    ops: Vec<PayloadOp>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload defines mark '{name}' more than once")]
    DuplicateMark { name: String },

    #[error("payload branch targets unknown mark '{name}'")]
    UnboundMark { name: String },
}

impl Payload {
    pub fn new(ops: Vec<PayloadOp>) -> Self {
        Payload { ops }
    }

    pub fn ops(&self) -> &[PayloadOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Symbolic marks defined by this payload, in order.
    pub fn marks(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| op.mark.as_deref())
    }

    /// Resolve marks into labels minted by `stream` and produce finished ops.
    pub fn resolve(&self, stream: &mut InstructionStream) -> Result<Vec<Op>, PayloadError> {
        let mut labels: HashMap<&str, Label> = HashMap::new();
        for name in self.marks() {
            if labels.contains_key(name) {
                return Err(PayloadError::DuplicateMark {
                    name: name.to_string(),
                });
            }
            labels.insert(name, stream.define_label());
        }

        let mut resolved = Vec::with_capacity(self.ops.len());
        for template in &self.ops {
            let operand = match &template.operand {
                PayloadOperand::Concrete(operand) => operand.clone(),
                PayloadOperand::Mark(name) => {
                    let label =
                        labels
                            .get(name.as_str())
                            .ok_or_else(|| PayloadError::UnboundMark {
                                name: name.clone(),
                            })?;
                    Operand::Target(*label)
                }
            };
            let mut op = Op::new(template.opcode, operand);
            op.labels.extend(&template.labels);
            if let Some(mark) = &template.mark {
                op.labels.push(labels[mark.as_str()]);
            }
            resolved.push(op);
        }
        Ok(resolved)
    }
}

impl From<Vec<Op>> for Payload {
    fn from(ops: Vec<Op>) -> Self {
        Payload {
            ops: ops
                .into_iter()
                .map(|op| PayloadOp {
                    opcode: op.opcode,
                    operand: PayloadOperand::Concrete(op.operand),
                    mark: None,
                    labels: op.labels,
                })
                .collect(),
        }
    }
}
