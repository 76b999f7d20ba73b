//! Declarative patch files.
//!
//! Patch sets can be written as TOML instead of constructed in code; the
//! schema mirrors the engine types one-to-one and compiles into
//! [`PatchDescriptor`]s after validation. Branch destinations inside a
//! payload are symbolic marks, resolved against the target stream when the
//! descriptor is applied.

use crate::locate::{Anchor, AnchorBase, ShapeCheck};
use crate::patch::applicator::{EditMode, PatchDescriptor};
use crate::patch::payload::{Payload, PayloadOp};
use crate::patch::registry::PatchBatch;
use crate::stream::{Opcode, RoutineId};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchFile {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchEntry>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Semver range of host versions this file applies to.
    #[serde(default)]
    pub host_range: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchEntry {
    pub id: String,
    pub routine: String,
    pub anchor: AnchorSpec,
    pub expect: ExpectSpec,
    pub mode: ModeSpec,
    #[serde(default)]
    pub ops: Vec<OpSpec>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AnchorSpec {
    Offset {
        position: usize,
        #[serde(default)]
        shift: isize,
    },
    CallTo {
        routine: String,
        #[serde(default)]
        search_start: usize,
        #[serde(default)]
        shift: isize,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExpectSpec {
    Opcode { opcode: Opcode },
    Window { opcodes: Vec<Opcode> },
    /// xxh3 of the window's mnemonics, as produced by
    /// [`ShapeCheck::fingerprint`]. Hex ("0x…") or decimal.
    Fingerprint { length: usize, xxh3: String },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModeSpec {
    InsertBefore,
    InsertAfter,
    Replace { removed: usize },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum OpSpec {
    Nop {
        #[serde(default)]
        mark: Option<String>,
    },
    LoadConst {
        value: i64,
        #[serde(default)]
        mark: Option<String>,
    },
    LoadLocal {
        index: u16,
        #[serde(default)]
        mark: Option<String>,
    },
    StoreLocal {
        index: u16,
        #[serde(default)]
        mark: Option<String>,
    },
    LoadArg {
        index: u16,
        #[serde(default)]
        mark: Option<String>,
    },
    LoadField {
        field: String,
        #[serde(default)]
        mark: Option<String>,
    },
    StoreField {
        field: String,
        #[serde(default)]
        mark: Option<String>,
    },
    Add {
        #[serde(default)]
        mark: Option<String>,
    },
    Sub {
        #[serde(default)]
        mark: Option<String>,
    },
    Pop {
        #[serde(default)]
        mark: Option<String>,
    },
    Dup {
        #[serde(default)]
        mark: Option<String>,
    },
    Call {
        routine: String,
        #[serde(default)]
        mark: Option<String>,
    },
    Jump {
        target: String,
        #[serde(default)]
        mark: Option<String>,
    },
    JumpIfTrue {
        target: String,
        #[serde(default)]
        mark: Option<String>,
    },
    JumpIfFalse {
        target: String,
        #[serde(default)]
        mark: Option<String>,
    },
    Return {
        #[serde(default)]
        mark: Option<String>,
    },
}

impl OpSpec {
    pub fn mark(&self) -> Option<&str> {
        match self {
            OpSpec::Nop { mark }
            | OpSpec::LoadConst { mark, .. }
            | OpSpec::LoadLocal { mark, .. }
            | OpSpec::StoreLocal { mark, .. }
            | OpSpec::LoadArg { mark, .. }
            | OpSpec::LoadField { mark, .. }
            | OpSpec::StoreField { mark, .. }
            | OpSpec::Add { mark }
            | OpSpec::Sub { mark }
            | OpSpec::Pop { mark }
            | OpSpec::Dup { mark }
            | OpSpec::Call { mark, .. }
            | OpSpec::Jump { mark, .. }
            | OpSpec::JumpIfTrue { mark, .. }
            | OpSpec::JumpIfFalse { mark, .. }
            | OpSpec::Return { mark } => mark.as_deref(),
        }
    }

    /// Branch destination mark, for branch specs.
    pub fn target(&self) -> Option<&str> {
        match self {
            OpSpec::Jump { target, .. }
            | OpSpec::JumpIfTrue { target, .. }
            | OpSpec::JumpIfFalse { target, .. } => Some(target),
            _ => None,
        }
    }

    fn to_payload_op(&self) -> PayloadOp {
        let op = match self {
            OpSpec::Nop { .. } => PayloadOp::nop(),
            OpSpec::LoadConst { value, .. } => PayloadOp::load_const(*value),
            OpSpec::LoadLocal { index, .. } => PayloadOp::load_local(*index),
            OpSpec::StoreLocal { index, .. } => PayloadOp::store_local(*index),
            OpSpec::LoadArg { index, .. } => PayloadOp::load_arg(*index),
            OpSpec::LoadField { field, .. } => PayloadOp::load_field(field.as_str()),
            OpSpec::StoreField { field, .. } => PayloadOp::store_field(field.as_str()),
            OpSpec::Add { .. } => PayloadOp::add(),
            OpSpec::Sub { .. } => PayloadOp::sub(),
            OpSpec::Pop { .. } => PayloadOp::pop(),
            OpSpec::Dup { .. } => PayloadOp::dup(),
            OpSpec::Call { routine, .. } => PayloadOp::call(routine.as_str()),
            OpSpec::Jump { target, .. } => PayloadOp::jump(target.as_str()),
            OpSpec::JumpIfTrue { target, .. } => PayloadOp::jump_if_true(target.as_str()),
            OpSpec::JumpIfFalse { target, .. } => PayloadOp::jump_if_false(target.as_str()),
            OpSpec::Return { .. } => PayloadOp::ret(),
        };
        match self.mark() {
            Some(mark) => op.marked(mark),
            None => op,
        }
    }
}

impl PatchFile {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        for patch in &self.patches {
            let id = || {
                if patch.id.trim().is_empty() {
                    None
                } else {
                    Some(patch.id.clone())
                }
            };

            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            }
            if patch.routine.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: id(),
                    field: "routine",
                });
            }

            if let AnchorSpec::CallTo { routine, .. } = &patch.anchor {
                if routine.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: id(),
                        field: "anchor.routine",
                    });
                }
            }

            match &patch.expect {
                ExpectSpec::Opcode { .. } => {}
                ExpectSpec::Window { opcodes } => {
                    if opcodes.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id(),
                            field: "expect.opcodes",
                        });
                    }
                }
                ExpectSpec::Fingerprint { length, xxh3 } => {
                    if *length == 0 {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id(),
                            message: "fingerprint length must be positive".to_string(),
                        });
                    }
                    if parse_xxh3(xxh3).is_none() {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id(),
                            message: format!("'{xxh3}' is not a valid xxh3 value"),
                        });
                    }
                }
            }

            if let ModeSpec::Replace { removed } = &patch.mode {
                if *removed == 0 {
                    issues.push(ValidationIssue::InvalidCombo {
                        patch_id: id(),
                        message: "replace requires a positive removed count".to_string(),
                    });
                }
            }

            let mut marks = HashSet::new();
            for op in &patch.ops {
                if let Some(mark) = op.mark() {
                    if mark.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id(),
                            field: "ops.mark",
                        });
                    } else if !marks.insert(mark) {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id(),
                            message: format!("mark '{mark}' is defined more than once"),
                        });
                    }
                }
            }
            for op in &patch.ops {
                if let Some(target) = op.target() {
                    if target.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id(),
                            field: "ops.target",
                        });
                    } else if !marks.contains(target) {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id(),
                            message: format!("branch targets undefined mark '{target}'"),
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

impl PatchEntry {
    /// Compile one validated entry into an engine descriptor.
    pub fn to_descriptor(&self) -> Result<PatchDescriptor, ValidationError> {
        let anchor = match &self.anchor {
            AnchorSpec::Offset { position, shift } => Anchor {
                base: AnchorBase::Position(*position),
                shift: *shift,
            },
            AnchorSpec::CallTo {
                routine,
                search_start,
                shift,
            } => Anchor {
                base: AnchorBase::CallTo {
                    routine: routine.as_str().into(),
                    search_start: *search_start,
                },
                shift: *shift,
            },
        };

        let expect = match &self.expect {
            ExpectSpec::Opcode { opcode } => ShapeCheck::Opcode(*opcode),
            ExpectSpec::Window { opcodes } => ShapeCheck::Window(opcodes.clone()),
            ExpectSpec::Fingerprint { length, xxh3 } => ShapeCheck::Fingerprint {
                len: *length,
                xxh3: parse_xxh3(xxh3).ok_or_else(|| ValidationError {
                    issues: vec![ValidationIssue::InvalidCombo {
                        patch_id: Some(self.id.clone()),
                        message: format!("'{xxh3}' is not a valid xxh3 value"),
                    }],
                })?,
            },
        };

        let mode = match &self.mode {
            ModeSpec::InsertBefore => EditMode::InsertBefore,
            ModeSpec::InsertAfter => EditMode::InsertAfter,
            ModeSpec::Replace { removed } => EditMode::Replace { removed: *removed },
        };

        Ok(PatchDescriptor {
            id: self.id.clone(),
            routine: RoutineId::new(self.routine.as_str()),
            anchor,
            expect,
            mode,
            payload: Payload::new(self.ops.iter().map(OpSpec::to_payload_op).collect()),
        })
    }
}

impl PatchFile {
    /// Compile into per-routine batches, preserving file order within each
    /// routine and the order routines first appear.
    pub fn into_batches(self) -> Result<Vec<PatchBatch>, ValidationError> {
        let mut batches: Vec<PatchBatch> = Vec::new();
        for patch in &self.patches {
            let descriptor = patch.to_descriptor()?;
            match batches
                .iter_mut()
                .find(|batch| batch.routine.as_str() == patch.routine)
            {
                Some(batch) => batch.descriptors.push(descriptor),
                None => {
                    let mut batch = PatchBatch::new(patch.routine.as_str(), vec![descriptor]);
                    batch.host_range = self.meta.host_range.clone();
                    batches.push(batch);
                }
            }
        }
        Ok(batches)
    }
}

fn parse_xxh3(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch file contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}
