//! The single mutation primitive for instruction streams.
//!
//! All higher-level edits (descriptor application, injected call sites)
//! compile down to one [`Splice`]: remove `remove` operations at `at` and
//! put `ops` in their place. Intelligence lives in anchor resolution and
//! shape checking, not in the application logic.
//!
//! A splice validates everything before touching the stream: bounds, payload
//! label hygiene, and whether every jump-target marker on a removed
//! operation has somewhere to go. On any error the stream is left exactly as
//! it was.

use crate::stream::{InstructionStream, Label, Op};
use std::collections::HashSet;
use thiserror::Error;

/// A verified span replacement on an instruction stream.
///
/// `insert` is a splice that removes nothing; `replace` removes an explicit
/// count. Marker relocation follows the stream's ownership rules:
///
/// - insert: markers on the operation that was at `at` move to the first
///   inserted operation, which now occupies the logical location those
///   branches were targeting;
/// - replace: markers on every removed operation move to the first inserted
///   operation, or to the next surviving operation when nothing is inserted;
///   if no operation survives to receive them, the splice fails and the
///   stream is unmodified.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "a Splice does nothing until apply() is called"]
pub struct Splice {
    pub at: usize,
    pub remove: usize,
    pub ops: Vec<Op>,
}

/// What a successful splice did to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "SpliceReceipt reports what the edit changed"]
pub struct SpliceReceipt {
    pub inserted: usize,
    pub removed: usize,
    /// Jump-target markers moved to a new owning operation.
    pub relocated: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpliceError {
    #[error("splice range [{at}, {at} + {remove}) is out of bounds for stream of length {len}")]
    OutOfRange { at: usize, remove: usize, len: usize },

    #[error("payload op {index} carries operand kind '{found}' which does not fit its opcode")]
    MalformedPayload { index: usize, found: &'static str },

    #[error("payload attaches label {label} more than once")]
    DuplicatePayloadLabel { label: Label },

    #[error("payload label {label} is already owned by an operation in the stream")]
    ForeignLabel { label: Label },

    #[error(
        "removing {remove} operation(s) at position {at} would orphan {orphaned} jump-target \
         marker(s) with no surviving operation to receive them"
    )]
    DanglingMarkers {
        at: usize,
        remove: usize,
        orphaned: usize,
    },
}

impl Splice {
    /// Insert `ops` at `position`; everything at `position` and later shifts
    /// right.
    pub fn insert(at: usize, ops: Vec<Op>) -> Self {
        Splice { at, remove: 0, ops }
    }

    /// Remove `remove` operations starting at `position` and splice `ops` in
    /// their place.
    pub fn replace(at: usize, remove: usize, ops: Vec<Op>) -> Self {
        Splice { at, remove, ops }
    }

    fn validate(&self, stream: &InstructionStream) -> Result<(), SpliceError> {
        let len = stream.len();
        let end = self
            .at
            .checked_add(self.remove)
            .filter(|end| *end <= len)
            .ok_or(SpliceError::OutOfRange {
                at: self.at,
                remove: self.remove,
                len,
            })?;

        let mut payload_labels = HashSet::new();
        for (index, op) in self.ops.iter().enumerate() {
            if !op.opcode.accepts(&op.operand) {
                return Err(SpliceError::MalformedPayload {
                    index,
                    found: op.operand.kind(),
                });
            }
            for label in &op.labels {
                if !payload_labels.insert(*label) {
                    return Err(SpliceError::DuplicatePayloadLabel { label: *label });
                }
                if stream.position_of_label(*label).is_some() {
                    return Err(SpliceError::ForeignLabel { label: *label });
                }
            }
        }

        // Dangling precheck: an emptying replace at the tail has no surviving
        // operation to receive the removed span's markers.
        if self.remove > 0 && self.ops.is_empty() && end == len {
            let orphaned: usize = stream.ops()[self.at..end]
                .iter()
                .map(|op| op.labels.len())
                .sum();
            if orphaned > 0 {
                return Err(SpliceError::DanglingMarkers {
                    at: self.at,
                    remove: self.remove,
                    orphaned,
                });
            }
        }

        Ok(())
    }

    /// Apply the splice, relocating markers as needed.
    ///
    /// On error the stream is byte-for-byte what it was before the call.
    pub fn apply(self, stream: &mut InstructionStream) -> Result<SpliceReceipt, SpliceError> {
        self.validate(stream)?;

        let labels_before = stream.label_count();
        let Splice {
            at,
            remove,
            mut ops,
        } = self;
        let inserted = ops.len();

        if remove == 0 && inserted == 0 {
            return Ok(SpliceReceipt {
                inserted: 0,
                removed: 0,
                relocated: 0,
            });
        }

        // Gather the markers whose owning operation is displaced or removed.
        let displaced: Vec<Label> = if remove == 0 {
            if inserted > 0 && at < stream.len() {
                std::mem::take(&mut stream.ops_mut()[at].labels)
            } else {
                Vec::new()
            }
        } else {
            stream
                .ops_mut()
                .iter_mut()
                .skip(at)
                .take(remove)
                .flat_map(|op| std::mem::take(&mut op.labels))
                .collect()
        };
        let relocated = displaced.len();

        if let Some(head) = ops.first_mut() {
            head.labels.extend(displaced);
            stream.ops_mut().splice(at..at + remove, ops);
        } else {
            stream.ops_mut().splice(at..at + remove, ops);
            if relocated > 0 {
                // Validated above: a surviving operation exists at `at`.
                stream.ops_mut()[at].labels.extend(displaced);
            }
        }

        debug_assert_eq!(stream.label_count(), labels_before);
        Ok(SpliceReceipt {
            inserted,
            removed: remove,
            relocated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Opcode;

    fn labeled_stream(ops: Vec<Op>) -> InstructionStream {
        InstructionStream::new("Game::target", ops).unwrap()
    }

    #[test]
    fn insert_shifts_and_relocates_displaced_markers() {
        // [A, B(L0)] + insert X at 1 => [A, X(L0), B]
        let l = Label::from_raw(0);
        let mut stream = labeled_stream(vec![Op::load_const(1), Op::ret().with_label(l)]);

        let receipt = Splice::insert(1, vec![Op::nop()]).apply(&mut stream).unwrap();

        assert_eq!(receipt, SpliceReceipt { inserted: 1, removed: 0, relocated: 1 });
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.op_at(1).unwrap().opcode, Opcode::Nop);
        assert_eq!(stream.op_at(1).unwrap().labels, vec![l]);
        assert!(stream.op_at(2).unwrap().labels.is_empty());
    }

    #[test]
    fn insert_at_end_moves_nothing() {
        let l = Label::from_raw(0);
        let mut stream = labeled_stream(vec![Op::load_const(1), Op::ret().with_label(l)]);

        let receipt = Splice::insert(2, vec![Op::nop()]).apply(&mut stream).unwrap();

        assert_eq!(receipt.relocated, 0);
        assert_eq!(stream.position_of_label(l), Some(1));
    }

    #[test]
    fn replace_moves_markers_to_head_of_payload() {
        let l = Label::from_raw(0);
        let mut stream = labeled_stream(vec![
            Op::load_const(1),
            Op::nop().with_label(l),
            Op::ret(),
        ]);

        let receipt = Splice::replace(1, 1, vec![Op::load_const(2), Op::pop()])
            .apply(&mut stream)
            .unwrap();

        assert_eq!(receipt, SpliceReceipt { inserted: 2, removed: 1, relocated: 1 });
        assert_eq!(stream.len(), 4);
        assert_eq!(stream.position_of_label(l), Some(1));
        assert_eq!(stream.op_at(1).unwrap().opcode, Opcode::LoadConst);
    }

    #[test]
    fn replace_with_empty_moves_markers_to_next_survivor() {
        // [A, B(L0), C] - B => [A, C(L0)]
        let l = Label::from_raw(0);
        let mut stream = labeled_stream(vec![
            Op::load_const(1),
            Op::nop().with_label(l),
            Op::ret(),
        ]);

        let receipt = Splice::replace(1, 1, vec![]).apply(&mut stream).unwrap();

        assert_eq!(receipt, SpliceReceipt { inserted: 0, removed: 1, relocated: 1 });
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.op_at(1).unwrap().opcode, Opcode::Return);
        assert_eq!(stream.position_of_label(l), Some(1));
    }

    #[test]
    fn replace_with_empty_and_no_survivor_fails_without_mutating() {
        let l = Label::from_raw(0);
        let mut stream = labeled_stream(vec![Op::load_const(1), Op::ret().with_label(l)]);
        let before = stream.clone();

        let err = Splice::replace(1, 1, vec![]).apply(&mut stream).unwrap_err();

        assert_eq!(err, SpliceError::DanglingMarkers { at: 1, remove: 1, orphaned: 1 });
        assert_eq!(stream, before);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut stream = labeled_stream(vec![Op::ret()]);
        let err = Splice::replace(0, 2, vec![]).apply(&mut stream).unwrap_err();
        assert_eq!(err, SpliceError::OutOfRange { at: 0, remove: 2, len: 1 });

        let err = Splice::insert(2, vec![Op::nop()]).apply(&mut stream).unwrap_err();
        assert_eq!(err, SpliceError::OutOfRange { at: 2, remove: 0, len: 1 });
    }

    #[test]
    fn malformed_payload_is_rejected() {
        use crate::stream::Operand;
        let mut stream = labeled_stream(vec![Op::ret()]);
        let bad = Op::new(Opcode::Call, Operand::Int(4));
        let err = Splice::insert(0, vec![bad]).apply(&mut stream).unwrap_err();
        assert_eq!(err, SpliceError::MalformedPayload { index: 0, found: "int" });
    }

    #[test]
    fn payload_label_already_owned_is_rejected() {
        let l = Label::from_raw(0);
        let mut stream = labeled_stream(vec![Op::nop().with_label(l), Op::ret()]);
        let before = stream.clone();

        let err = Splice::insert(1, vec![Op::nop().with_label(l)])
            .apply(&mut stream)
            .unwrap_err();

        assert_eq!(err, SpliceError::ForeignLabel { label: l });
        assert_eq!(stream, before);
    }

    #[test]
    fn payload_duplicate_label_is_rejected() {
        let mut stream = labeled_stream(vec![Op::ret()]);
        let mut fresh_stream = stream.clone();
        let l = fresh_stream.define_label();

        let err = Splice::insert(0, vec![Op::nop().with_label(l), Op::nop().with_label(l)])
            .apply(&mut stream)
            .unwrap_err();

        assert_eq!(err, SpliceError::DuplicatePayloadLabel { label: l });
    }

    #[test]
    fn empty_splice_is_a_no_op() {
        let mut stream = labeled_stream(vec![Op::ret()]);
        let before = stream.clone();
        let receipt = Splice::insert(0, vec![]).apply(&mut stream).unwrap();
        assert_eq!(receipt, SpliceReceipt { inserted: 0, removed: 0, relocated: 0 });
        assert_eq!(stream, before);
    }

    #[test]
    fn length_invariant_holds() {
        let mut stream = labeled_stream(vec![
            Op::load_const(1),
            Op::load_const(2),
            Op::add(),
            Op::ret(),
        ]);
        let old_len = stream.len();

        let receipt = Splice::replace(1, 2, vec![Op::load_const(5)])
            .apply(&mut stream)
            .unwrap();

        assert_eq!(stream.len(), old_len + receipt.inserted - receipt.removed);
    }
}
