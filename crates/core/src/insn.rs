//! Label-based instruction lists.
//!
//! Jump targets, exception ranges and debug tables reference [`Label`] markers that live inside
//! the instruction list, never byte offsets, so code can be inserted anywhere without patching
//! branches. Offsets only exist inside the writer.
use crate::opcode::Opcode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Largest code attribute the JVM accepts.
pub const MAX_CODE_SIZE: usize = 65_535;

static NEXT_LABEL: AtomicU32 = AtomicU32::new(1);

/// A position marker inside an instruction list. Labels are unique for the lifetime of the
/// process, so code from different methods can never be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(u32);

impl Label {
    /// Allocates a fresh label.
    pub fn new() -> Self {
        Self(NEXT_LABEL.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Reference kinds of a `CONSTANT_MethodHandle`.
pub mod handle_kind {
    #![allow(missing_docs)]
    pub const GET_FIELD: u8 = 1;
    pub const GET_STATIC: u8 = 2;
    pub const PUT_FIELD: u8 = 3;
    pub const PUT_STATIC: u8 = 4;
    pub const INVOKE_VIRTUAL: u8 = 5;
    pub const INVOKE_STATIC: u8 = 6;
    pub const INVOKE_SPECIAL: u8 = 7;
    pub const NEW_INVOKE_SPECIAL: u8 = 8;
    pub const INVOKE_INTERFACE: u8 = 9;
}

/// A method handle constant.
#[derive(Debug, Clone, PartialEq)]
pub struct Handle {
    /// One of [`handle_kind`].
    pub kind: u8,
    pub owner: String,
    pub name: String,
    pub desc: String,
    /// Whether the owner is an interface.
    pub interface: bool,
}

impl Handle {
    /// Whether the handle refers to a field rather than a method.
    pub const fn is_field(&self) -> bool {
        self.kind <= handle_kind::PUT_STATIC
    }
}

/// A dynamically-computed constant (`CONSTANT_Dynamic`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDynamic {
    pub name: String,
    pub desc: String,
    pub bootstrap: Handle,
    pub args: Vec<Constant>,
}

/// A loadable constant: `ldc` operands, `ConstantValue` attributes and bootstrap arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    /// A class literal; internal name or array descriptor.
    Class(String),
    MethodType(String),
    MethodHandle(Handle),
    Dynamic(Box<ConstantDynamic>),
}

impl Constant {
    /// Whether the constant takes two operand stack slots.
    pub fn is_wide(&self) -> bool {
        match self {
            Self::Long(_) | Self::Double(_) => true,
            Self::Dynamic(dynamic) => matches!(dynamic.desc.as_str(), "J" | "D"),
            _ => false,
        }
    }
}

/// A verification type as stored in a `StackMapTable` entry. Long and double take one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object(String),
    /// An object created by the `new` instruction directly after this label.
    Uninitialized(Label),
}

/// A decoded stack map frame in expanded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameNode {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

/// A single instruction or pseudo-instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Instructions without operands.
    Op(Opcode),
    /// `bipush`, `sipush` and `newarray`.
    Int { opcode: Opcode, operand: i32 },
    /// Local variable loads and stores, and `ret`.
    Var { opcode: Opcode, index: u16 },
    Iinc { index: u16, delta: i16 },
    /// `new`, `anewarray`, `checkcast` and `instanceof`.
    Type { opcode: Opcode, class: String },
    Field {
        opcode: Opcode,
        owner: String,
        name: String,
        desc: String,
    },
    Method {
        opcode: Opcode,
        owner: String,
        name: String,
        desc: String,
        /// Whether the owner is an interface.
        interface: bool,
    },
    InvokeDynamic {
        name: String,
        desc: String,
        bootstrap: Handle,
        args: Vec<Constant>,
    },
    Jump { opcode: Opcode, target: Label },
    Ldc(Constant),
    TableSwitch {
        low: i32,
        high: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        keys: Vec<i32>,
        targets: Vec<Label>,
    },
    MultiANewArray { desc: String, dims: u8 },
    /// A position marker. Emits no code.
    Label(Label),
    /// A decoded stack map frame. Emits no code.
    Frame(FrameNode),
}

impl Insn {
    /// Shorthand for [`Insn::Op`].
    pub const fn op(opcode: Opcode) -> Self {
        Self::Op(opcode)
    }

    pub fn jump(opcode: Opcode, target: Label) -> Self {
        Self::Jump { opcode, target }
    }

    pub fn field(opcode: Opcode, owner: &str, name: &str, desc: &str) -> Self {
        Self::Field {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }

    pub fn method(opcode: Opcode, owner: &str, name: &str, desc: &str) -> Self {
        Self::Method {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            interface: opcode == Opcode::INVOKEINTERFACE,
        }
    }

    pub fn type_insn(opcode: Opcode, class: &str) -> Self {
        Self::Type {
            opcode,
            class: class.to_string(),
        }
    }

    /// The smallest instruction pushing `value` as an int.
    pub const fn push_int(value: i32) -> Self {
        match value {
            -1..=5 => match Opcode::from_byte((Opcode::ICONST_0.to_byte() as i32 + value) as u8) {
                Some(op) => Self::Op(op),
                None => Self::Ldc(Constant::Int(value)),
            },
            -128..=127 => Self::Int {
                opcode: Opcode::BIPUSH,
                operand: value,
            },
            -32768..=32767 => Self::Int {
                opcode: Opcode::SIPUSH,
                operand: value,
            },
            _ => Self::Ldc(Constant::Int(value)),
        }
    }

    /// The smallest instruction pushing `value` as a long.
    pub const fn push_long(value: i64) -> Self {
        match value {
            0 => Self::Op(Opcode::LCONST_0),
            1 => Self::Op(Opcode::LCONST_1),
            _ => Self::Ldc(Constant::Long(value)),
        }
    }

    /// The int value pushed by this instruction, if it is an int literal.
    pub fn int_literal(&self) -> Option<i32> {
        match self {
            Self::Op(op) if (Opcode::ICONST_M1..=Opcode::ICONST_5).contains(op) => {
                Some(op.to_byte() as i32 - Opcode::ICONST_0.to_byte() as i32)
            }
            Self::Int { opcode, operand } if *opcode != Opcode::NEWARRAY => Some(*operand),
            Self::Ldc(Constant::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// The long value pushed by this instruction, if it is a long literal.
    pub const fn long_literal(&self) -> Option<i64> {
        match self {
            Self::Op(Opcode::LCONST_0) => Some(0),
            Self::Op(Opcode::LCONST_1) => Some(1),
            Self::Ldc(Constant::Long(value)) => Some(*value),
            _ => None,
        }
    }

    /// The opcode of a real instruction, `None` for labels and frames.
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Self::Op(opcode)
            | Self::Int { opcode, .. }
            | Self::Var { opcode, .. }
            | Self::Type { opcode, .. }
            | Self::Field { opcode, .. }
            | Self::Method { opcode, .. }
            | Self::Jump { opcode, .. } => *opcode,
            Self::Iinc { .. } => Opcode::IINC,
            Self::InvokeDynamic { .. } => Opcode::INVOKEDYNAMIC,
            Self::Ldc(_) => Opcode::LDC,
            Self::TableSwitch { .. } => Opcode::TABLESWITCH,
            Self::LookupSwitch { .. } => Opcode::LOOKUPSWITCH,
            Self::MultiANewArray { .. } => Opcode::MULTIANEWARRAY,
            Self::Label(_) | Self::Frame(_) => return None,
        })
    }

    /// Whether this is a label or frame marker.
    pub const fn is_pseudo(&self) -> bool {
        matches!(self, Self::Label(_) | Self::Frame(_))
    }

    /// Labels this instruction may transfer control to.
    pub fn branch_targets(&self) -> Vec<Label> {
        match self {
            Self::Jump { target, .. } => vec![*target],
            Self::TableSwitch {
                default, targets, ..
            }
            | Self::LookupSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            _ => Vec::new(),
        }
    }

    /// Upper bound of the encoded size when the instruction starts at any offset.
    ///
    /// Jumps are counted in their widest form and switches with maximal padding, matching what
    /// the writer could emit after wide-jump expansion. `ldc` is counted as `ldc_w` because its
    /// width depends on the constant pool index, which is only known while writing the class.
    pub fn max_size(&self) -> usize {
        match self {
            Self::Label(_) | Self::Frame(_) => 0,
            Self::Op(_) => 1,
            Self::Int { opcode, .. } => {
                if *opcode == Opcode::SIPUSH {
                    3
                } else {
                    2
                }
            }
            Self::Var { opcode, index } => var_size(*opcode, *index),
            Self::Iinc { index, delta } => {
                if *index <= 0xff && (-128..=127).contains(delta) {
                    3
                } else {
                    6
                }
            }
            Self::Type { .. } | Self::Field { .. } | Self::Ldc(_) => 3,
            Self::Method { opcode, .. } => {
                if *opcode == Opcode::INVOKEINTERFACE {
                    5
                } else {
                    3
                }
            }
            Self::InvokeDynamic { .. } => 5,
            Self::Jump { opcode, .. } => {
                if opcode.is_conditional_jump() {
                    8
                } else {
                    5
                }
            }
            Self::TableSwitch { targets, .. } => 1 + 3 + 12 + 4 * targets.len(),
            Self::LookupSwitch { keys, .. } => 1 + 3 + 8 + 8 * keys.len(),
            Self::MultiANewArray { .. } => 4,
        }
    }
}

/// Encoded size of a local variable instruction.
pub(crate) const fn var_size(opcode: Opcode, index: u16) -> usize {
    if opcode.short_var_form(index).is_some() {
        1
    } else if index <= 0xff {
        2
    } else {
        4
    }
}

/// An ordered, mutable instruction sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsnList {
    insns: Vec<Insn>,
}

impl InsnList {
    pub const fn new() -> Self {
        Self { insns: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Insn> {
        self.insns.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Insn> {
        self.insns.get(index)
    }

    pub fn as_slice(&self) -> &[Insn] {
        &self.insns
    }

    /// Mutable access for in-place operand rewrites. The sequence itself cannot change shape
    /// through this iterator.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Insn> {
        self.insns.iter_mut()
    }

    pub fn push(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    pub fn extend<I>(&mut self, insns: I)
    where
        I: IntoIterator<Item = Insn>,
    {
        self.insns.extend(insns);
    }

    /// Inserts `insns` before position `index`.
    pub fn insert_all<I>(&mut self, index: usize, insns: I)
    where
        I: IntoIterator<Item = Insn>,
    {
        let index = index.min(self.insns.len());
        self.insns.splice(index..index, insns);
    }

    /// Inserts `insns` at the very beginning of the code.
    pub fn prepend<I>(&mut self, insns: I)
    where
        I: IntoIterator<Item = Insn>,
    {
        self.insert_all(0, insns);
    }

    /// Removes the real instruction at `index`. Labels and frames are kept in place because
    /// other instructions may still reference them; `None` is returned for those.
    pub fn remove(&mut self, index: usize) -> Option<Insn> {
        match self.insns.get(index) {
            Some(insn) if !insn.is_pseudo() => Some(self.insns.remove(index)),
            _ => None,
        }
    }

    /// Replaces the real instruction at `index` with `replacement`.
    pub fn replace<I>(&mut self, index: usize, replacement: I) -> Option<Insn>
    where
        I: IntoIterator<Item = Insn>,
    {
        let removed = self.remove(index)?;
        self.insert_all(index, replacement);
        Some(removed)
    }

    /// Position of the marker for `label`.
    pub fn position_of(&self, label: Label) -> Option<usize> {
        self.insns
            .iter()
            .position(|insn| matches!(insn, Insn::Label(l) if *l == label))
    }

    /// Number of real instructions, excluding labels and frames.
    pub fn real_len(&self) -> usize {
        self.insns.iter().filter(|insn| !insn.is_pseudo()).count()
    }

    /// Upper bound of the serialized code length, in bytes. Never below the length the writer
    /// emits, and above it whenever a jump stays short, a switch needs less than three bytes of
    /// padding or an `ldc` gets a one-byte index.
    pub fn code_size(&self) -> usize {
        code_size(&self.insns)
    }

    /// Removes all decoded stack map frames.
    pub fn strip_frames(&mut self) {
        self.insns.retain(|insn| !matches!(insn, Insn::Frame(_)));
    }
}

impl IntoIterator for InsnList {
    type Item = Insn;
    type IntoIter = std::vec::IntoIter<Insn>;

    fn into_iter(self) -> Self::IntoIter {
        self.insns.into_iter()
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = &'a Insn;
    type IntoIter = std::slice::Iter<'a, Insn>;

    fn into_iter(self) -> Self::IntoIter {
        self.insns.iter()
    }
}

impl FromIterator<Insn> for InsnList {
    fn from_iter<T: IntoIterator<Item = Insn>>(iter: T) -> Self {
        Self {
            insns: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Insn>> for InsnList {
    fn from(insns: Vec<Insn>) -> Self {
        Self { insns }
    }
}

impl std::ops::Index<usize> for InsnList {
    type Output = Insn;

    fn index(&self, index: usize) -> &Insn {
        &self.insns[index]
    }
}

/// Deterministic upper bound of the bytes `insns` occupy once serialized. The exact length
/// needs the class's constant pool and is only computed by the encoder's layout pass.
pub fn code_size(insns: &[Insn]) -> usize {
    insns.iter().map(Insn::max_size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_unique() {
        let a = Label::new();
        let b = Label::new();
        assert_ne!(a, b, "fresh labels must never collide");
    }

    #[test]
    fn push_int_picks_smallest_form() {
        assert_eq!(Insn::push_int(3), Insn::Op(Opcode::ICONST_3));
        assert_eq!(Insn::push_int(-1), Insn::Op(Opcode::ICONST_M1));
        assert!(matches!(Insn::push_int(100), Insn::Int { opcode: Opcode::BIPUSH, .. }));
        assert!(matches!(Insn::push_int(1000), Insn::Int { opcode: Opcode::SIPUSH, .. }));
        assert_eq!(Insn::push_int(1 << 20), Insn::Ldc(Constant::Int(1 << 20)));
        for value in [-200, -1, 0, 5, 6, 127, 128, 40_000, i32::MIN] {
            assert_eq!(Insn::push_int(value).int_literal(), Some(value));
        }
        assert_eq!(Insn::push_long(7).long_literal(), Some(7));
    }

    #[test]
    fn insertion_keeps_jump_targets() {
        let target = Label::new();
        let mut list: InsnList = vec![
            Insn::jump(Opcode::GOTO, target),
            Insn::Op(Opcode::NOP),
            Insn::Label(target),
            Insn::Op(Opcode::RETURN),
        ]
        .into();
        list.insert_all(1, [Insn::Op(Opcode::ICONST_0), Insn::Op(Opcode::POP)]);
        assert_eq!(list.position_of(target), Some(4));
        assert_eq!(list.remove(4), None, "labels are never removed");
        assert_eq!(list.replace(3, [Insn::Op(Opcode::ACONST_NULL), Insn::Op(Opcode::POP)]), Some(Insn::Op(Opcode::NOP)));
        assert_eq!(list.real_len(), 6);
    }

    #[test]
    fn code_size_is_an_upper_bound() {
        let list: InsnList = vec![
            Insn::Var { opcode: Opcode::ALOAD, index: 0 },
            Insn::Var { opcode: Opcode::ILOAD, index: 300 },
            Insn::jump(Opcode::IFEQ, Label::new()),
            Insn::Op(Opcode::RETURN),
        ]
        .into();
        assert_eq!(list.code_size(), 1 + 4 + 8 + 1);
    }
}
