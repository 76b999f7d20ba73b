use crate::stream::errors::StreamError;
use crate::stream::op::{Label, Op, RoutineId};
use std::collections::HashSet;
use std::fmt::Write as _;

/// The decompiled body of one host routine: an ordered, mutable sequence of
/// operations plus the label allocator for that routine.
///
/// A stream is created once per targeted routine at load time, mutated only
/// through [`Splice`](crate::splice::Splice), and then handed to the host's
/// own compilation path. Construction validates the body loudly: operand
/// kinds must fit their opcodes, every label is owned by exactly one
/// operation, and every branch targets a bound label.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionStream {
    routine: RoutineId,
    ops: Vec<Op>,
    next_label: u32,
}

impl InstructionStream {
    /// Build a stream from a decompiled body, validating its shape.
    pub fn new(routine: impl Into<RoutineId>, ops: Vec<Op>) -> Result<Self, StreamError> {
        let mut owned = HashSet::new();
        let mut next_label = 0u32;

        for (position, op) in ops.iter().enumerate() {
            if !op.opcode.accepts(&op.operand) {
                return Err(StreamError::OperandMismatch {
                    position,
                    opcode: op.opcode,
                    found: op.operand.kind(),
                });
            }
            for label in &op.labels {
                if !owned.insert(*label) {
                    return Err(StreamError::DuplicateLabel { label: *label });
                }
                next_label = next_label.max(label.index() + 1);
            }
        }

        for (position, op) in ops.iter().enumerate() {
            if let Some(label) = op.branch_target() {
                if !owned.contains(&label) {
                    return Err(StreamError::UnboundTarget { position, label });
                }
                next_label = next_label.max(label.index() + 1);
            }
        }

        Ok(InstructionStream {
            routine: routine.into(),
            ops,
            next_label,
        })
    }

    /// An empty body, mainly useful in tests.
    pub fn empty(routine: impl Into<RoutineId>) -> Self {
        InstructionStream {
            routine: routine.into(),
            ops: Vec::new(),
            next_label: 0,
        }
    }

    /// Identity of the routine this body was decompiled from.
    pub fn routine(&self) -> &RoutineId {
        &self.routine
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Offset locator: the operation at `position`, or `None` past the end.
    pub fn op_at(&self, position: usize) -> Option<&Op> {
        self.ops.get(position)
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Mint a fresh jump-target marker, owned by no operation yet.
    pub fn define_label(&mut self) -> Label {
        let label = Label::new(self.next_label);
        self.next_label += 1;
        label
    }

    /// Total number of jump-target markers attached to operations.
    ///
    /// Conserved by every successful splice; used by tests and debug
    /// assertions to detect lost or duplicated markers.
    pub fn label_count(&self) -> usize {
        self.ops.iter().map(|op| op.labels.len()).sum()
    }

    /// Position of the operation that owns `label`, if any.
    pub fn position_of_label(&self, label: Label) -> Option<usize> {
        self.ops.iter().position(|op| op.labels.contains(&label))
    }

    /// Human-readable listing of the body, one operation per line.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (position, op) in self.ops.iter().enumerate() {
            let _ = writeln!(out, "{position:>4}: {op}");
        }
        out
    }

    pub(crate) fn ops_mut(&mut self) -> &mut Vec<Op> {
        &mut self.ops
    }
}
