//! Anchor resolution and expected-shape assertions.
//!
//! Anchors come in two flavors: a raw position, or a content predicate
//! ("first call to routine X at or after a search start"). Both resolve to a
//! position against the live stream, and every descriptor pairs its anchor
//! with a [`ShapeCheck`] that must hold before any mutation happens. A
//! failed resolution or check is host drift, not a crash.

use crate::stream::{InstructionStream, Opcode, RoutineId};
use std::fmt;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Content locator: position of the first operation calling `routine`, at or
/// after `search_start`.
///
/// Deterministic: always the leftmost match, stable across repeated calls on
/// an unmodified stream. The `search_start` doubles as the offset hint for
/// routines that contain several calls to the same target.
pub fn find_call(
    stream: &InstructionStream,
    routine: &RoutineId,
    search_start: usize,
) -> Option<usize> {
    stream
        .ops()
        .iter()
        .enumerate()
        .skip(search_start)
        .find(|(_, op)| op.called_routine() == Some(routine))
        .map(|(position, _)| position)
}

/// Base of an anchor, before any shift adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorBase {
    /// A raw position in the stream.
    Position(usize),
    /// The first call to `routine` at or after `search_start`.
    CallTo {
        routine: RoutineId,
        search_start: usize,
    },
}

/// A resolvable position in a stream, used as the basis for one edit.
///
/// `shift` expresses adjustments like "two operations after the call"; the
/// shifted position must still land on an existing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub base: AnchorBase,
    pub shift: isize,
}

impl Anchor {
    pub fn at(position: usize) -> Self {
        Anchor {
            base: AnchorBase::Position(position),
            shift: 0,
        }
    }

    pub fn call_to(routine: impl Into<RoutineId>) -> Self {
        Anchor {
            base: AnchorBase::CallTo {
                routine: routine.into(),
                search_start: 0,
            },
            shift: 0,
        }
    }

    /// Restrict a call anchor to matches at or after `start`.
    pub fn searching_from(mut self, start: usize) -> Self {
        if let AnchorBase::CallTo { search_start, .. } = &mut self.base {
            *search_start = start;
        }
        self
    }

    /// Adjust the resolved position by `shift` operations.
    pub fn shifted(mut self, shift: isize) -> Self {
        self.shift = shift;
        self
    }

    /// Resolve to a position against the live stream.
    pub fn resolve(&self, stream: &InstructionStream) -> Result<usize, LocateError> {
        let base = match &self.base {
            AnchorBase::Position(position) => *position,
            AnchorBase::CallTo {
                routine,
                search_start,
            } => find_call(stream, routine, *search_start).ok_or_else(|| {
                LocateError::CallNotFound {
                    routine: routine.clone(),
                    search_start: *search_start,
                }
            })?,
        };

        let position = base as isize + self.shift;
        if position < 0 || position as usize >= stream.len() {
            return Err(LocateError::OutOfBounds {
                position,
                len: stream.len(),
            });
        }
        Ok(position as usize)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            AnchorBase::Position(position) => write!(f, "position {position}")?,
            AnchorBase::CallTo {
                routine,
                search_start,
            } => {
                write!(f, "first call to {routine}")?;
                if *search_start > 0 {
                    write!(f, " from {search_start}")?;
                }
            }
        }
        if self.shift != 0 {
            write!(f, " {:+}", self.shift)?;
        }
        Ok(())
    }
}

/// Anchor resolution failure. Reported as host drift by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("no call to {routine} at or after position {search_start}")]
    CallNotFound {
        routine: RoutineId,
        search_start: usize,
    },

    #[error("anchor resolves to position {position}, out of bounds for stream of length {len}")]
    OutOfBounds { position: isize, len: usize },
}

/// Expected-shape assertion at an anchor, checked before mutation.
///
/// The redundant, human-auditable guard against host drift: a single
/// expected opcode, a window of consecutive opcodes, or an xxh3 fingerprint
/// of the window's mnemonics for larger spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeCheck {
    Opcode(Opcode),
    Window(Vec<Opcode>),
    Fingerprint { len: usize, xxh3: u64 },
}

/// Expected-versus-found detail of a failed shape check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub expected: String,
    pub found: String,
}

impl ShapeCheck {
    /// Mint a fingerprint check from the current shape of a stream, the way
    /// patch authors capture a known-good host version.
    pub fn fingerprint(stream: &InstructionStream, at: usize, len: usize) -> Option<ShapeCheck> {
        window_digest(stream, at, len).map(|xxh3| ShapeCheck::Fingerprint { len, xxh3 })
    }

    /// Assert the check against the live stream at `at`.
    pub fn check(&self, stream: &InstructionStream, at: usize) -> Result<(), ShapeMismatch> {
        match self {
            ShapeCheck::Opcode(expected) => {
                let found = match stream.op_at(at) {
                    Some(op) => op.opcode,
                    None => return Err(self.mismatch("not found")),
                };
                if found != *expected {
                    return Err(self.mismatch(found.mnemonic()));
                }
            }
            ShapeCheck::Window(expected) => {
                for (offset, want) in expected.iter().enumerate() {
                    let found = match stream.op_at(at + offset) {
                        Some(op) => op.opcode,
                        None => return Err(self.mismatch("not found")),
                    };
                    if found != *want {
                        return Err(self.mismatch(&format!(
                            "{} at offset {offset}",
                            found.mnemonic()
                        )));
                    }
                }
            }
            ShapeCheck::Fingerprint { len, xxh3 } => match window_digest(stream, at, *len) {
                None => return Err(self.mismatch("not found")),
                Some(found) if found != *xxh3 => {
                    return Err(self.mismatch(&format!("fingerprint {found:#018x}")))
                }
                Some(_) => {}
            },
        }
        Ok(())
    }

    fn mismatch(&self, found: &str) -> ShapeMismatch {
        ShapeMismatch {
            expected: self.to_string(),
            found: found.to_string(),
        }
    }
}

impl fmt::Display for ShapeCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeCheck::Opcode(opcode) => f.write_str(opcode.mnemonic()),
            ShapeCheck::Window(opcodes) => {
                write!(f, "window [")?;
                for (idx, opcode) in opcodes.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    f.write_str(opcode.mnemonic())?;
                }
                write!(f, "]")
            }
            ShapeCheck::Fingerprint { len, xxh3 } => {
                write!(f, "fingerprint {xxh3:#018x} over {len} ops")
            }
        }
    }
}

/// xxh3 of the mnemonics in `[at, at + len)`, or `None` if the window runs
/// past the end of the stream.
fn window_digest(stream: &InstructionStream, at: usize, len: usize) -> Option<u64> {
    let end = at.checked_add(len)?;
    if end > stream.len() || len == 0 {
        return None;
    }
    let joined = stream.ops()[at..end]
        .iter()
        .map(|op| op.opcode.mnemonic())
        .collect::<Vec<_>>()
        .join(" ");
    Some(xxh3_64(joined.as_bytes()))
}
