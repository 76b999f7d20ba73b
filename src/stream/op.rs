use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a host routine, e.g. `"Game1::_Chat_ParseCommand"`.
///
/// Routines are referenced symbolically: the engine never resolves them to
/// addresses, it only needs a stable identity for call operands and for
/// matching patch batches to decompiled streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutineId(String);

impl RoutineId {
    pub fn new(name: impl Into<String>) -> Self {
        RoutineId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutineId {
    fn from(name: &str) -> Self {
        RoutineId::new(name)
    }
}

impl From<String> for RoutineId {
    fn from(name: String) -> Self {
        RoutineId(name)
    }
}

/// Identity of a host field, e.g. `"Game1::xLocalPlayer"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(String);

impl FieldId {
    pub fn new(name: impl Into<String>) -> Self {
        FieldId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldId {
    fn from(name: &str) -> Self {
        FieldId::new(name)
    }
}

/// Jump-target marker.
///
/// A label is owned by exactly one operation at any time; branch operands
/// reference it as their destination. Labels are minted by
/// [`InstructionStream::define_label`](crate::stream::InstructionStream::define_label)
/// so identities never collide within a stream. Moving a label between
/// operations is an explicit relocation step performed by the splice editor,
/// never an incidental side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(u32);

impl Label {
    /// Reconstruct a label from its raw index, e.g. when reading a routine
    /// dump. Inside a patch session, prefer `define_label`.
    pub fn from_raw(index: u32) -> Self {
        Label(index)
    }

    pub(crate) fn new(index: u32) -> Self {
        Label(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Semantic opcode tag of one executable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Opcode {
    Nop,
    LoadConst,
    LoadLocal,
    StoreLocal,
    LoadArg,
    LoadField,
    StoreField,
    Add,
    Sub,
    Pop,
    Dup,
    Call,
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    Return,
}

impl Opcode {
    /// Returns true if this opcode transfers control to a labeled operation.
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse)
    }

    /// Stable textual form, used in listings and shape fingerprints.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::LoadConst => "load-const",
            Opcode::LoadLocal => "load-local",
            Opcode::StoreLocal => "store-local",
            Opcode::LoadArg => "load-arg",
            Opcode::LoadField => "load-field",
            Opcode::StoreField => "store-field",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Pop => "pop",
            Opcode::Dup => "dup",
            Opcode::Call => "call",
            Opcode::Jump => "jump",
            Opcode::JumpIfTrue => "jump-if-true",
            Opcode::JumpIfFalse => "jump-if-false",
            Opcode::Return => "return",
        }
    }

    /// Whether `operand` is the kind this opcode carries.
    pub fn accepts(self, operand: &Operand) -> bool {
        match self {
            Opcode::Nop
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Pop
            | Opcode::Dup
            | Opcode::Return => matches!(operand, Operand::None),
            Opcode::LoadConst => matches!(operand, Operand::Int(_)),
            Opcode::LoadLocal | Opcode::StoreLocal => matches!(operand, Operand::Local(_)),
            Opcode::LoadArg => matches!(operand, Operand::Arg(_)),
            Opcode::LoadField | Opcode::StoreField => matches!(operand, Operand::Field(_)),
            Opcode::Call => matches!(operand, Operand::Routine(_)),
            Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
                matches!(operand, Operand::Target(_))
            }
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Operand of one operation: a literal, a local-variable or argument index,
/// a reference into the host, or a branch target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operand {
    #[default]
    None,
    Int(i64),
    Local(u16),
    Arg(u16),
    Field(FieldId),
    Routine(RoutineId),
    Target(Label),
}

impl Operand {
    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }

    /// Operand kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Operand::None => "none",
            Operand::Int(_) => "int",
            Operand::Local(_) => "local",
            Operand::Arg(_) => "arg",
            Operand::Field(_) => "field",
            Operand::Routine(_) => "routine",
            Operand::Target(_) => "target",
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Local(i) => write!(f, "loc{i}"),
            Operand::Arg(i) => write!(f, "a{i}"),
            Operand::Field(field) => write!(f, "{field}"),
            Operand::Routine(routine) => write!(f, "{routine}"),
            Operand::Target(label) => write!(f, "-> {label}"),
        }
    }
}

/// One executable step of a routine body: opcode tag, operand, and the
/// jump-target markers attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub opcode: Opcode,
    #[serde(default, skip_serializing_if = "Operand::is_none")]
    pub operand: Operand,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

impl Op {
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        Op {
            opcode,
            operand,
            labels: Vec::new(),
        }
    }

    pub fn nop() -> Self {
        Op::new(Opcode::Nop, Operand::None)
    }

    pub fn load_const(value: i64) -> Self {
        Op::new(Opcode::LoadConst, Operand::Int(value))
    }

    pub fn load_local(index: u16) -> Self {
        Op::new(Opcode::LoadLocal, Operand::Local(index))
    }

    pub fn store_local(index: u16) -> Self {
        Op::new(Opcode::StoreLocal, Operand::Local(index))
    }

    pub fn load_arg(index: u16) -> Self {
        Op::new(Opcode::LoadArg, Operand::Arg(index))
    }

    pub fn load_field(field: impl Into<FieldId>) -> Self {
        Op::new(Opcode::LoadField, Operand::Field(field.into()))
    }

    pub fn store_field(field: impl Into<FieldId>) -> Self {
        Op::new(Opcode::StoreField, Operand::Field(field.into()))
    }

    pub fn add() -> Self {
        Op::new(Opcode::Add, Operand::None)
    }

    pub fn sub() -> Self {
        Op::new(Opcode::Sub, Operand::None)
    }

    pub fn pop() -> Self {
        Op::new(Opcode::Pop, Operand::None)
    }

    pub fn dup() -> Self {
        Op::new(Opcode::Dup, Operand::None)
    }

    pub fn call(routine: impl Into<RoutineId>) -> Self {
        Op::new(Opcode::Call, Operand::Routine(routine.into()))
    }

    pub fn jump(target: Label) -> Self {
        Op::new(Opcode::Jump, Operand::Target(target))
    }

    pub fn jump_if_true(target: Label) -> Self {
        Op::new(Opcode::JumpIfTrue, Operand::Target(target))
    }

    pub fn jump_if_false(target: Label) -> Self {
        Op::new(Opcode::JumpIfFalse, Operand::Target(target))
    }

    pub fn ret() -> Self {
        Op::new(Opcode::Return, Operand::None)
    }

    /// Attach a jump-target marker to this operation.
    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    /// Routine referenced by a call operand, if any.
    pub fn called_routine(&self) -> Option<&RoutineId> {
        match (&self.opcode, &self.operand) {
            (Opcode::Call, Operand::Routine(routine)) => Some(routine),
            _ => None,
        }
    }

    /// Branch destination, if this operation is a branch.
    pub fn branch_target(&self) -> Option<Label> {
        match (&self.opcode, &self.operand) {
            (Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse, Operand::Target(label)) => {
                Some(*label)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operand.is_none() {
            write!(f, "{}", self.opcode)?;
        } else {
            write!(f, "{} {}", self.opcode, self.operand)?;
        }
        if !self.labels.is_empty() {
            write!(f, "  [")?;
            for (idx, label) in self.labels.iter().enumerate() {
                if idx > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{label}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_matching_operands() {
        assert!(Op::nop().opcode.accepts(&Op::nop().operand));
        assert!(Op::load_const(7).opcode.accepts(&Operand::Int(7)));
        assert!(Op::call("Game::update").opcode.accepts(&Operand::Routine("x".into())));
        assert!(Op::load_field("Game::player").opcode.accepts(&Operand::Field("x".into())));
        assert!(Op::jump(Label::from_raw(0))
            .opcode
            .accepts(&Operand::Target(Label::from_raw(1))));
    }

    #[test]
    fn accepts_rejects_wrong_kinds() {
        assert!(!Opcode::Call.accepts(&Operand::Int(3)));
        assert!(!Opcode::Return.accepts(&Operand::Local(0)));
        assert!(!Opcode::Jump.accepts(&Operand::None));
        assert!(!Opcode::LoadLocal.accepts(&Operand::Arg(1)));
    }

    #[test]
    fn branch_classification() {
        assert!(Opcode::Jump.is_branch());
        assert!(Opcode::JumpIfFalse.is_branch());
        assert!(!Opcode::Call.is_branch());
        assert!(!Opcode::Return.is_branch());
    }

    #[test]
    fn display_forms() {
        let op = Op::jump_if_false(Label::from_raw(3)).with_label(Label::from_raw(1));
        assert_eq!(op.to_string(), "jump-if-false -> L3  [L1]");
        assert_eq!(Op::load_arg(2).to_string(), "load-arg a2");
        assert_eq!(Op::ret().to_string(), "return");
    }

    #[test]
    fn called_routine_only_for_calls() {
        let call = Op::call("Audio::play_cue");
        assert_eq!(call.called_routine(), Some(&RoutineId::new("Audio::play_cue")));
        assert_eq!(Op::ret().called_routine(), None);
    }

    #[test]
    fn serde_round_trip() {
        let op = Op::call("Game::chat_parse").with_label(Label::from_raw(2));
        let json = serde_json::to_string(&op).unwrap();
        let back: Op = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
