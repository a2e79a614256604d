//! Stack map frame inference and operand stack sizing.
//!
//! [`analyze`] runs a worklist data-flow pass over a method's instruction list, merging type
//! states at branch targets and exception handlers until a fixpoint is reached. Reference types
//! meet at their common superclass, which is delegated to a [`SuperclassResolver`] so callers
//! can consult the program being written and its libraries. [`max_stack`] only tracks stack
//! heights and is used when full inference is not possible.
use crate::descriptor::{self, FieldType};
use crate::insn::{Constant, Insn, Label};
use crate::model::{MethodModel, OBJECT};
use crate::opcode::Opcode;
use jarcloak_utils::errors::FrameError;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;

const THROWABLE: &str = "java/lang/Throwable";

/// Upper bound on block evaluations per instruction before giving up.
const STEPS_PER_INSN: usize = 64;

/// Computes the nearest common superclass of two classes.
pub trait SuperclassResolver {
    /// Both arguments are internal names of non-array classes.
    fn common_super_class(&mut self, left: &str, right: &str) -> String;
}

impl<F> SuperclassResolver for F
where
    F: FnMut(&str, &str) -> String,
{
    fn common_super_class(&mut self, left: &str, right: &str) -> String {
        self(left, right)
    }
}

/// The inferred type of a local variable slot or stack entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameValue {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal name, or descriptor for arrays.
    Object(String),
    /// Result of the `new` instruction at this position (instruction index during inference,
    /// byte offset once handed to the writer).
    Uninitialized(usize),
}

impl FrameValue {
    /// Long and double values take two slots.
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    fn object(name: &str) -> Self {
        Self::Object(name.to_string())
    }

    fn of_field_type(ty: &FieldType) -> Self {
        match ty {
            FieldType::Boolean
            | FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Int => Self::Integer,
            FieldType::Float => Self::Float,
            FieldType::Long => Self::Long,
            FieldType::Double => Self::Double,
            FieldType::Reference(name) => Self::Object(name.clone()),
        }
    }

    fn of_descriptor(desc: &str) -> Result<Self, FrameError> {
        Ok(Self::of_field_type(&descriptor::parse_field(desc)?))
    }
}

/// Type state before an instruction. Locals are indexed by slot, so a long or double occupies
/// its slot plus a `Top` in the next one; stack entries are one per value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameState {
    pub locals: Vec<FrameValue>,
    pub stack: Vec<FrameValue>,
}

impl FrameState {
    /// Operand stack height in slots.
    pub fn stack_slots(&self) -> usize {
        self.stack.iter().map(|v| 1 + usize::from(v.is_wide())).sum()
    }

    /// Locals in stack map form: the padding `Top` after wide values is dropped and trailing
    /// `Top` entries are trimmed.
    pub fn compact_locals(&self) -> Vec<FrameValue> {
        let mut out = Vec::with_capacity(self.locals.len());
        let mut i = 0;
        while i < self.locals.len() {
            let value = &self.locals[i];
            out.push(value.clone());
            i += if value.is_wide() { 2 } else { 1 };
        }
        while out.last() == Some(&FrameValue::Top) {
            out.pop();
        }
        out
    }
}

/// Result of frame inference for one method.
#[derive(Debug, Clone, Default)]
pub struct MethodFrames {
    pub max_stack: u16,
    pub max_locals: u16,
    /// Frames required by the verifier, keyed by the index of the instruction they precede.
    pub frames: Vec<(usize, FrameState)>,
    /// Instruction index ranges no execution path reaches.
    pub unreachable: Vec<Range<usize>>,
}

/// One exception table entry resolved to instruction indices.
#[derive(Debug)]
struct Handler {
    range: Range<usize>,
    target: usize,
    catch: FrameValue,
}

/// Instruction positions shared by both analyses.
#[derive(Debug)]
struct Layout {
    labels: HashMap<Label, usize>,
    /// `next_real[i]` is the first real instruction at or after `i`.
    next_real: Vec<usize>,
}

impl Layout {
    fn new(insns: &[Insn]) -> Self {
        let mut labels = HashMap::new();
        for (index, insn) in insns.iter().enumerate() {
            if let Insn::Label(label) = insn {
                labels.insert(*label, index);
            }
        }
        let mut next_real = vec![insns.len(); insns.len() + 1];
        for index in (0..insns.len()).rev() {
            next_real[index] = if insns[index].is_pseudo() {
                next_real[index + 1]
            } else {
                index
            };
        }
        Self { labels, next_real }
    }

    /// Index of the first real instruction executed when control reaches `label`.
    fn anchor(&self, label: Label) -> Result<usize, FrameError> {
        let index = self.labels.get(&label).ok_or(FrameError::UnknownLabel)?;
        Ok(self.next_real[*index])
    }

    fn first(&self) -> usize {
        self.next_real[0]
    }
}

/// Infers stack map frames, max stack and max locals for `method` of class `owner`.
pub fn analyze(
    owner: &str,
    method: &MethodModel,
    resolver: &mut dyn SuperclassResolver,
) -> Result<MethodFrames, FrameError> {
    let insns = method.instructions.as_slice();
    let layout = Layout::new(insns);
    let n = insns.len();
    let mut result = MethodFrames {
        max_locals: max_locals(method)?,
        ..MethodFrames::default()
    };
    if layout.first() == n {
        return Ok(result);
    }

    let mut handlers = Vec::with_capacity(method.try_catch_blocks.len());
    for block in &method.try_catch_blocks {
        let catch = FrameValue::object(block.catch_type.as_deref().unwrap_or(THROWABLE));
        handlers.push(Handler {
            range: layout.anchor(block.start)?..layout.anchor(block.end)?,
            target: layout.anchor(block.handler)?,
            catch,
        });
    }

    // Blocks start at the entry, at every branch target and handler, and after every
    // instruction that does not fall through.
    let mut leader = vec![false; n + 1];
    let mut needs_frame = vec![false; n + 1];
    leader[layout.first()] = true;
    for handler in &handlers {
        leader[handler.target] = true;
        needs_frame[handler.target] = true;
    }
    for (index, insn) in insns.iter().enumerate() {
        if matches!(insn.opcode(), Some(Opcode::JSR | Opcode::RET)) {
            return Err(FrameError::Subroutine);
        }
        for target in insn.branch_targets() {
            let anchor = layout.anchor(target)?;
            leader[anchor] = true;
            needs_frame[anchor] = true;
        }
        if insn.opcode().is_some_and(Opcode::ends_block) {
            let next = layout.next_real[index + 1];
            leader[next] = true;
            needs_frame[next] = true;
        }
    }

    let mut analysis = Analysis {
        owner,
        insns,
        resolver,
        entry: vec![None; n],
        queued: vec![false; n],
        worklist: VecDeque::new(),
        max_stack: 0,
    };
    analysis.merge_into(layout.first(), initial_frame(owner, method)?)?;

    let mut reached = vec![false; n];
    let step_limit = n.saturating_mul(STEPS_PER_INSN).max(1024);
    let mut steps = 0;
    while let Some(start) = analysis.worklist.pop_front() {
        analysis.queued[start] = false;
        steps += 1;
        if steps > step_limit {
            return Err(FrameError::NoFixpoint(steps));
        }
        let Some(mut state) = analysis.entry[start].clone() else {
            continue;
        };
        let mut index = start;
        loop {
            if index >= n {
                return Err(FrameError::FallsOffEnd);
            }
            let insn = &insns[index];
            if insn.is_pseudo() {
                index += 1;
                continue;
            }
            if index != start && leader[index] {
                analysis.merge_into(index, state)?;
                break;
            }
            reached[index] = true;
            for handler in handlers.iter().filter(|h| h.range.contains(&index)) {
                let handler_state = FrameState {
                    locals: state.locals.clone(),
                    stack: vec![handler.catch.clone()],
                };
                analysis.merge_into(handler.target, handler_state)?;
            }
            analysis.execute(index, &mut state)?;
            for target in insn.branch_targets() {
                analysis.merge_into(layout.anchor(target)?, state.clone())?;
            }
            if insn.opcode().is_some_and(Opcode::ends_block) {
                break;
            }
            index += 1;
        }
    }

    let mut frames = Vec::new();
    let mut unreachable = Vec::new();
    let mut index = 0;
    while index < n {
        if insns[index].is_pseudo() {
            index += 1;
            continue;
        }
        if reached[index] {
            if needs_frame[index] {
                if let Some(state) = &analysis.entry[index] {
                    frames.push((index, state.clone()));
                }
            }
            index += 1;
            continue;
        }
        let start = index;
        let mut end = index + 1;
        while end < n && (insns[end].is_pseudo() || !reached[end]) {
            end += 1;
        }
        // Trailing labels belong to whatever follows the dead range.
        while end > start + 1 && insns[end - 1].is_pseudo() {
            end -= 1;
        }
        frames.push((
            start,
            FrameState {
                locals: Vec::new(),
                stack: vec![FrameValue::object(THROWABLE)],
            },
        ));
        unreachable.push(start..end);
        analysis.max_stack = analysis.max_stack.max(1);
        index = end;
    }

    let widest_locals = frames
        .iter()
        .map(|(_, state)| state.locals.len())
        .max()
        .unwrap_or(0);
    result.max_locals = result.max_locals.max(to_u16(widest_locals)?);
    result.max_stack = to_u16(analysis.max_stack)?;
    result.frames = frames;
    result.unreachable = unreachable;
    Ok(result)
}

fn to_u16(value: usize) -> Result<u16, FrameError> {
    u16::try_from(value).map_err(|_| FrameError::InvalidOperands {
        index: 0,
        detail: format!("{value} slots exceed the class file limit"),
    })
}

/// Locals the method needs: its arguments plus every slot touched by a load, store or `iinc`.
pub fn max_locals(method: &MethodModel) -> Result<u16, FrameError> {
    let args = descriptor::argument_slots(&method.desc)? + usize::from(!method.is_static());
    let used = method
        .instructions
        .iter()
        .filter_map(|insn| match insn {
            Insn::Var { opcode, index } => {
                let wide = matches!(
                    opcode,
                    Opcode::LLOAD | Opcode::DLOAD | Opcode::LSTORE | Opcode::DSTORE
                );
                Some(*index as usize + 1 + usize::from(wide))
            }
            Insn::Iinc { index, .. } => Some(*index as usize + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    to_u16(args.max(used))
}

/// The implicit frame at method entry: `this` (uninitialized inside constructors) followed by
/// the arguments.
pub fn initial_frame(owner: &str, method: &MethodModel) -> Result<FrameState, FrameError> {
    let mut locals = Vec::new();
    if !method.is_static() {
        locals.push(if method.name == "<init>" {
            FrameValue::UninitializedThis
        } else {
            FrameValue::object(owner)
        });
    }
    for arg in descriptor::parse_method(&method.desc)?.args {
        let value = FrameValue::of_field_type(&arg);
        let wide = value.is_wide();
        locals.push(value);
        if wide {
            locals.push(FrameValue::Top);
        }
    }
    Ok(FrameState {
        locals,
        stack: Vec::new(),
    })
}

struct Analysis<'a> {
    owner: &'a str,
    insns: &'a [Insn],
    resolver: &'a mut dyn SuperclassResolver,
    entry: Vec<Option<FrameState>>,
    queued: Vec<bool>,
    worklist: VecDeque<usize>,
    max_stack: usize,
}

impl Analysis<'_> {
    fn merge_into(&mut self, index: usize, state: FrameState) -> Result<(), FrameError> {
        if index >= self.entry.len() {
            return Err(FrameError::FallsOffEnd);
        }
        self.max_stack = self.max_stack.max(state.stack_slots());
        // detached while merging; the resolver needs `&mut self`
        let merged = match self.entry[index].take() {
            None => state,
            Some(existing) => {
                if existing.stack.len() != state.stack.len() {
                    let error = FrameError::StackHeightMismatch {
                        index,
                        expected: existing.stack_slots(),
                        found: state.stack_slots(),
                    };
                    self.entry[index] = Some(existing);
                    return Err(error);
                }
                let locals = self.merge_locals(&existing.locals, &state.locals);
                let stack = existing
                    .stack
                    .iter()
                    .zip(&state.stack)
                    .map(|(a, b)| self.merge_value(a, b))
                    .collect();
                let merged = FrameState { locals, stack };
                if merged == existing {
                    self.entry[index] = Some(existing);
                    return Ok(());
                }
                merged
            }
        };
        self.entry[index] = Some(merged);
        if !self.queued[index] {
            self.queued[index] = true;
            self.worklist.push_back(index);
        }
        Ok(())
    }

    fn merge_locals(&mut self, a: &[FrameValue], b: &[FrameValue]) -> Vec<FrameValue> {
        let len = a.len().max(b.len());
        (0..len)
            .map(|i| match (a.get(i), b.get(i)) {
                (Some(x), Some(y)) => self.merge_value(x, y),
                _ => FrameValue::Top,
            })
            .collect()
    }

    fn merge_value(&mut self, a: &FrameValue, b: &FrameValue) -> FrameValue {
        if a == b {
            return a.clone();
        }
        match (a, b) {
            (FrameValue::Null, FrameValue::Object(_)) => b.clone(),
            (FrameValue::Object(_), FrameValue::Null) => a.clone(),
            (FrameValue::Object(left), FrameValue::Object(right)) => {
                FrameValue::Object(self.common_super(left, right))
            }
            _ => FrameValue::Top,
        }
    }

    fn common_super(&mut self, left: &str, right: &str) -> String {
        if !left.starts_with('[') && !right.starts_with('[') {
            return self.resolver.common_super_class(left, right);
        }
        let (left_dims, left_elem) = split_array(left);
        let (right_dims, right_elem) = split_array(right);
        if left_dims == right_dims {
            if let (Some(l), Some(r)) = (class_of(left_elem), class_of(right_elem)) {
                let common = self.resolver.common_super_class(l, r);
                return format!("{}L{};", "[".repeat(left_dims), common);
            }
        }
        // Mixed dimensions or primitive elements meet at an array of Object one level up.
        let mut dims = left_dims.min(right_dims);
        let shallow_elem = if left_dims <= right_dims {
            left_elem
        } else {
            right_elem
        };
        if dims > 0 && class_of(shallow_elem).is_none() {
            dims -= 1;
        }
        if dims == 0 {
            OBJECT.to_string()
        } else {
            format!("{}L{};", "[".repeat(dims), OBJECT)
        }
    }

    fn pop(&self, state: &mut FrameState, index: usize) -> Result<FrameValue, FrameError> {
        state.stack.pop().ok_or(FrameError::StackUnderflow(index))
    }

    fn pop_n(&self, state: &mut FrameState, count: usize, index: usize) -> Result<(), FrameError> {
        if state.stack.len() < count {
            return Err(FrameError::StackUnderflow(index));
        }
        state.stack.truncate(state.stack.len() - count);
        Ok(())
    }

    fn pop_narrow(&self, state: &mut FrameState, index: usize) -> Result<FrameValue, FrameError> {
        let value = self.pop(state, index)?;
        if value.is_wide() {
            return Err(FrameError::InvalidOperands {
                index,
                detail: "category 2 value where category 1 expected".into(),
            });
        }
        Ok(value)
    }

    fn store(&self, state: &mut FrameState, slot: u16, value: FrameValue) {
        let slot = slot as usize;
        let wide = value.is_wide();
        let needed = slot + 1 + usize::from(wide);
        if state.locals.len() < needed {
            state.locals.resize(needed, FrameValue::Top);
        }
        if slot > 0 && state.locals[slot - 1].is_wide() {
            state.locals[slot - 1] = FrameValue::Top;
        }
        state.locals[slot] = value;
        if wide {
            state.locals[slot + 1] = FrameValue::Top;
        }
    }

    fn execute(&mut self, index: usize, state: &mut FrameState) -> Result<(), FrameError> {
        match &self.insns[index] {
            Insn::Label(_) | Insn::Frame(_) => {}
            Insn::Op(opcode) => self.execute_op(*opcode, index, state)?,
            Insn::Int { opcode, operand } => {
                if *opcode == Opcode::NEWARRAY {
                    self.pop(state, index)?;
                    let elem = match operand {
                        4 => "Z",
                        5 => "C",
                        6 => "F",
                        7 => "D",
                        8 => "B",
                        9 => "S",
                        10 => "I",
                        11 => "J",
                        _ => {
                            return Err(FrameError::InvalidOperands {
                                index,
                                detail: format!("newarray type {operand}"),
                            })
                        }
                    };
                    state.stack.push(FrameValue::Object(format!("[{elem}")));
                } else {
                    state.stack.push(FrameValue::Integer);
                }
            }
            Insn::Var { opcode, index: slot } => match opcode {
                Opcode::ILOAD => state.stack.push(FrameValue::Integer),
                Opcode::LLOAD => state.stack.push(FrameValue::Long),
                Opcode::FLOAD => state.stack.push(FrameValue::Float),
                Opcode::DLOAD => state.stack.push(FrameValue::Double),
                Opcode::ALOAD => {
                    let value = state
                        .locals
                        .get(*slot as usize)
                        .cloned()
                        .unwrap_or(FrameValue::Top);
                    state.stack.push(value);
                }
                Opcode::ISTORE | Opcode::FSTORE | Opcode::ASTORE => {
                    let value = self.pop_narrow(state, index)?;
                    let value = match opcode {
                        Opcode::ISTORE => FrameValue::Integer,
                        Opcode::FSTORE => FrameValue::Float,
                        _ => value,
                    };
                    self.store(state, *slot, value);
                }
                Opcode::LSTORE | Opcode::DSTORE => {
                    self.pop(state, index)?;
                    let value = if *opcode == Opcode::LSTORE {
                        FrameValue::Long
                    } else {
                        FrameValue::Double
                    };
                    self.store(state, *slot, value);
                }
                _ => return Err(FrameError::Subroutine),
            },
            Insn::Iinc { index: slot, .. } => self.store(state, *slot, FrameValue::Integer),
            Insn::Type { opcode, class } => match opcode {
                Opcode::NEW => state.stack.push(FrameValue::Uninitialized(index)),
                Opcode::ANEWARRAY => {
                    self.pop(state, index)?;
                    let array = if class.starts_with('[') {
                        format!("[{class}")
                    } else {
                        format!("[L{class};")
                    };
                    state.stack.push(FrameValue::Object(array));
                }
                Opcode::CHECKCAST => {
                    self.pop(state, index)?;
                    state.stack.push(FrameValue::Object(class.clone()));
                }
                _ => {
                    self.pop(state, index)?;
                    state.stack.push(FrameValue::Integer);
                }
            },
            Insn::Field { opcode, desc, .. } => {
                let value = FrameValue::of_descriptor(desc)?;
                match opcode {
                    Opcode::GETSTATIC => state.stack.push(value),
                    Opcode::PUTSTATIC => {
                        self.pop(state, index)?;
                    }
                    Opcode::GETFIELD => {
                        self.pop(state, index)?;
                        state.stack.push(value);
                    }
                    _ => self.pop_n(state, 2, index)?,
                }
            }
            Insn::Method {
                opcode, name, desc, ..
            } => {
                let parsed = descriptor::parse_method(desc)?;
                self.pop_n(state, parsed.args.len(), index)?;
                if *opcode != Opcode::INVOKESTATIC {
                    let receiver = self.pop(state, index)?;
                    if *opcode == Opcode::INVOKESPECIAL && name == "<init>" {
                        self.initialize(state, &receiver, index)?;
                    }
                }
                if let Some(ret) = &parsed.ret {
                    state.stack.push(FrameValue::of_field_type(ret));
                }
            }
            Insn::InvokeDynamic { desc, .. } => {
                let parsed = descriptor::parse_method(desc)?;
                self.pop_n(state, parsed.args.len(), index)?;
                if let Some(ret) = &parsed.ret {
                    state.stack.push(FrameValue::of_field_type(ret));
                }
            }
            Insn::Jump { opcode, .. } => match opcode {
                Opcode::GOTO | Opcode::GOTO_W => {}
                Opcode::JSR | Opcode::JSR_W => return Err(FrameError::Subroutine),
                Opcode::IFEQ
                | Opcode::IFNE
                | Opcode::IFLT
                | Opcode::IFGE
                | Opcode::IFGT
                | Opcode::IFLE
                | Opcode::IFNULL
                | Opcode::IFNONNULL => {
                    self.pop(state, index)?;
                }
                _ => self.pop_n(state, 2, index)?,
            },
            Insn::Ldc(constant) => state.stack.push(match constant {
                Constant::Int(_) => FrameValue::Integer,
                Constant::Float(_) => FrameValue::Float,
                Constant::Long(_) => FrameValue::Long,
                Constant::Double(_) => FrameValue::Double,
                Constant::String(_) => FrameValue::object("java/lang/String"),
                Constant::Class(_) => FrameValue::object("java/lang/Class"),
                Constant::MethodType(_) => FrameValue::object("java/lang/invoke/MethodType"),
                Constant::MethodHandle(_) => FrameValue::object("java/lang/invoke/MethodHandle"),
                Constant::Dynamic(dynamic) => FrameValue::of_descriptor(&dynamic.desc)?,
            }),
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                self.pop(state, index)?;
            }
            Insn::MultiANewArray { desc, dims } => {
                self.pop_n(state, *dims as usize, index)?;
                state.stack.push(FrameValue::Object(desc.clone()));
            }
        }
        self.max_stack = self.max_stack.max(state.stack_slots());
        Ok(())
    }

    /// Replaces every occurrence of an uninitialized value once its constructor ran.
    fn initialize(
        &self,
        state: &mut FrameState,
        receiver: &FrameValue,
        index: usize,
    ) -> Result<(), FrameError> {
        let initialized = match receiver {
            FrameValue::UninitializedThis => FrameValue::object(self.owner),
            FrameValue::Uninitialized(at) => match self.insns.get(*at) {
                Some(Insn::Type { class, .. }) => FrameValue::Object(class.clone()),
                _ => {
                    return Err(FrameError::InvalidOperands {
                        index,
                        detail: "constructor receiver does not come from `new`".into(),
                    })
                }
            },
            _ => return Ok(()),
        };
        for value in state.locals.iter_mut().chain(state.stack.iter_mut()) {
            if value == receiver {
                *value = initialized.clone();
            }
        }
        Ok(())
    }

    fn execute_op(
        &mut self,
        opcode: Opcode,
        index: usize,
        state: &mut FrameState,
    ) -> Result<(), FrameError> {
        use FrameValue as V;
        let byte = opcode.to_byte();
        // Arithmetic opcodes cycle through int, long, float, double.
        let kind = |offset: u8| match offset % 4 {
            0 => V::Integer,
            1 => V::Long,
            2 => V::Float,
            _ => V::Double,
        };
        match byte {
            0x00 => {}
            0x01 => state.stack.push(V::Null),
            0x02..=0x08 => state.stack.push(V::Integer),
            0x09 | 0x0a => state.stack.push(V::Long),
            0x0b..=0x0d => state.stack.push(V::Float),
            0x0e | 0x0f => state.stack.push(V::Double),
            // xALOAD
            0x2e..=0x35 => {
                self.pop(state, index)?;
                let array = self.pop(state, index)?;
                state.stack.push(match opcode {
                    Opcode::LALOAD => V::Long,
                    Opcode::FALOAD => V::Float,
                    Opcode::DALOAD => V::Double,
                    Opcode::AALOAD => match &array {
                        V::Object(desc) => descriptor::array_element(desc)
                            .map_or_else(|| V::object(OBJECT), |ty| V::of_field_type(&ty)),
                        _ => V::object(OBJECT),
                    },
                    _ => V::Integer,
                });
            }
            // xASTORE
            0x4f..=0x56 => self.pop_n(state, 3, index)?,
            0x57 => {
                self.pop_narrow(state, index)?;
            }
            0x58 => {
                if !self.pop(state, index)?.is_wide() {
                    self.pop_narrow(state, index)?;
                }
            }
            0x59 => {
                let v1 = self.pop_narrow(state, index)?;
                state.stack.extend([v1.clone(), v1]);
            }
            0x5a => {
                let v1 = self.pop_narrow(state, index)?;
                let v2 = self.pop_narrow(state, index)?;
                state.stack.extend([v1.clone(), v2, v1]);
            }
            0x5b => {
                let v1 = self.pop_narrow(state, index)?;
                let v2 = self.pop(state, index)?;
                if v2.is_wide() {
                    state.stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v3 = self.pop_narrow(state, index)?;
                    state.stack.extend([v1.clone(), v3, v2, v1]);
                }
            }
            0x5c => {
                let v1 = self.pop(state, index)?;
                if v1.is_wide() {
                    state.stack.extend([v1.clone(), v1]);
                } else {
                    let v2 = self.pop_narrow(state, index)?;
                    state.stack.extend([v2.clone(), v1.clone(), v2, v1]);
                }
            }
            0x5d => {
                let v1 = self.pop(state, index)?;
                if v1.is_wide() {
                    let v2 = self.pop_narrow(state, index)?;
                    state.stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v2 = self.pop_narrow(state, index)?;
                    let v3 = self.pop_narrow(state, index)?;
                    state
                        .stack
                        .extend([v2.clone(), v1.clone(), v3, v2, v1]);
                }
            }
            0x5e => {
                let v1 = self.pop(state, index)?;
                if v1.is_wide() {
                    let v2 = self.pop(state, index)?;
                    if v2.is_wide() {
                        state.stack.extend([v1.clone(), v2, v1]);
                    } else {
                        let v3 = self.pop_narrow(state, index)?;
                        state.stack.extend([v1.clone(), v3, v2, v1]);
                    }
                } else {
                    let v2 = self.pop_narrow(state, index)?;
                    let v3 = self.pop(state, index)?;
                    if v3.is_wide() {
                        state
                            .stack
                            .extend([v2.clone(), v1.clone(), v3, v2, v1]);
                    } else {
                        let v4 = self.pop_narrow(state, index)?;
                        state
                            .stack
                            .extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                    }
                }
            }
            0x5f => {
                let v1 = self.pop_narrow(state, index)?;
                let v2 = self.pop_narrow(state, index)?;
                state.stack.extend([v1, v2]);
            }
            // add, sub, mul, div, rem
            0x60..=0x73 => {
                self.pop_n(state, 2, index)?;
                state.stack.push(kind(byte - 0x60));
            }
            // neg
            0x74..=0x77 => {
                self.pop(state, index)?;
                state.stack.push(kind(byte - 0x74));
            }
            // shifts, and, or, xor: int forms on even offsets, long forms on odd ones
            0x78..=0x83 => {
                self.pop_n(state, 2, index)?;
                state
                    .stack
                    .push(if (byte - 0x78) % 2 == 0 { V::Integer } else { V::Long });
            }
            0x85..=0x93 => {
                self.pop(state, index)?;
                state.stack.push(match opcode {
                    Opcode::I2L | Opcode::F2L | Opcode::D2L => V::Long,
                    Opcode::I2F | Opcode::L2F | Opcode::D2F => V::Float,
                    Opcode::I2D | Opcode::L2D | Opcode::F2D => V::Double,
                    _ => V::Integer,
                });
            }
            0x94..=0x98 => {
                self.pop_n(state, 2, index)?;
                state.stack.push(V::Integer);
            }
            0xac..=0xb0 | 0xbf | 0xc2 | 0xc3 => {
                self.pop(state, index)?;
            }
            0xb1 => {}
            0xbe => {
                self.pop(state, index)?;
                state.stack.push(V::Integer);
            }
            _ => {
                return Err(FrameError::InvalidOperands {
                    index,
                    detail: format!("unexpected operand-less opcode {opcode}"),
                })
            }
        }
        Ok(())
    }
}

/// Splits an array descriptor into its dimension count and element descriptor.
fn split_array(desc: &str) -> (usize, &str) {
    let element = desc.trim_start_matches('[');
    (desc.len() - element.len(), element)
}

/// Class name of an `Lname;` element descriptor, or the name itself for a bare class.
fn class_of(element: &str) -> Option<&str> {
    if let Some(name) = element.strip_prefix('L') {
        return name.strip_suffix(';');
    }
    (element.len() > 1).then_some(element)
}

/// Max stack computed from stack heights alone. `jsr` is followed both into the subroutine and
/// to the instruction after it, which is where `ret` returns.
pub fn max_stack(method: &MethodModel) -> Result<u16, FrameError> {
    let insns = method.instructions.as_slice();
    let layout = Layout::new(insns);
    let n = insns.len();
    if layout.first() == n {
        return Ok(0);
    }
    let mut heights: Vec<Option<usize>> = vec![None; n + 1];
    let mut worklist = vec![(layout.first(), 0usize)];
    for block in &method.try_catch_blocks {
        worklist.push((layout.anchor(block.handler)?, 1));
    }
    let mut max = 0;
    while let Some((mut index, mut height)) = worklist.pop() {
        loop {
            if index >= n {
                break;
            }
            if insns[index].is_pseudo() {
                index += 1;
                continue;
            }
            match heights[index] {
                Some(seen) if seen >= height => break,
                _ => heights[index] = Some(height),
            }
            max = max.max(height);
            let insn = &insns[index];
            let (pop, push) = stack_effect(insn)?;
            if height < pop {
                return Err(FrameError::StackUnderflow(index));
            }
            height = height - pop + push;
            max = max.max(height);
            if matches!(insn.opcode(), Some(Opcode::JSR | Opcode::JSR_W)) {
                for target in insn.branch_targets() {
                    worklist.push((layout.anchor(target)?, height));
                }
                height -= 1;
            } else {
                for target in insn.branch_targets() {
                    worklist.push((layout.anchor(target)?, height));
                }
            }
            if insn.opcode().is_some_and(Opcode::ends_block) {
                break;
            }
            index += 1;
        }
    }
    to_u16(max)
}

/// Stack slots consumed and produced by one instruction.
fn stack_effect(insn: &Insn) -> Result<(usize, usize), FrameError> {
    let slots = |ty: &FieldType| ty.slots();
    Ok(match insn {
        Insn::Label(_) | Insn::Frame(_) => (0, 0),
        Insn::Op(opcode) => op_effect(*opcode),
        Insn::Int { opcode, .. } => {
            if *opcode == Opcode::NEWARRAY {
                (1, 1)
            } else {
                (0, 1)
            }
        }
        Insn::Var { opcode, .. } => match opcode {
            Opcode::ILOAD | Opcode::FLOAD | Opcode::ALOAD => (0, 1),
            Opcode::LLOAD | Opcode::DLOAD => (0, 2),
            Opcode::ISTORE | Opcode::FSTORE | Opcode::ASTORE => (1, 0),
            Opcode::LSTORE | Opcode::DSTORE => (2, 0),
            _ => (0, 0),
        },
        Insn::Iinc { .. } => (0, 0),
        Insn::Type { opcode, .. } => {
            if *opcode == Opcode::NEW {
                (0, 1)
            } else {
                (1, 1)
            }
        }
        Insn::Field { opcode, desc, .. } => {
            let size = descriptor::parse_field(desc)?.slots();
            match opcode {
                Opcode::GETSTATIC => (0, size),
                Opcode::PUTSTATIC => (size, 0),
                Opcode::GETFIELD => (1, size),
                _ => (1 + size, 0),
            }
        }
        Insn::Method { opcode, desc, .. } => {
            let parsed = descriptor::parse_method(desc)?;
            let args: usize = parsed.args.iter().map(slots).sum();
            let receiver = usize::from(*opcode != Opcode::INVOKESTATIC);
            (args + receiver, parsed.ret.as_ref().map_or(0, slots))
        }
        Insn::InvokeDynamic { desc, .. } => {
            let parsed = descriptor::parse_method(desc)?;
            let args: usize = parsed.args.iter().map(slots).sum();
            (args, parsed.ret.as_ref().map_or(0, slots))
        }
        Insn::Jump { opcode, .. } => match opcode {
            Opcode::GOTO | Opcode::GOTO_W => (0, 0),
            Opcode::JSR | Opcode::JSR_W => (0, 1),
            Opcode::IFEQ
            | Opcode::IFNE
            | Opcode::IFLT
            | Opcode::IFGE
            | Opcode::IFGT
            | Opcode::IFLE
            | Opcode::IFNULL
            | Opcode::IFNONNULL => (1, 0),
            _ => (2, 0),
        },
        Insn::Ldc(constant) => (0, if constant.is_wide() { 2 } else { 1 }),
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => (1, 0),
        Insn::MultiANewArray { dims, .. } => (*dims as usize, 1),
    })
}

fn op_effect(opcode: Opcode) -> (usize, usize) {
    match opcode.to_byte() {
        0x00 | 0xb1 => (0, 0),
        0x01..=0x08 | 0x0b..=0x0d => (0, 1),
        0x09 | 0x0a | 0x0e | 0x0f => (0, 2),
        0x2f | 0x31 => (2, 2),
        0x2e..=0x35 => (2, 1),
        0x50 | 0x52 => (4, 0),
        0x4f..=0x56 => (3, 0),
        0x57 => (1, 0),
        0x58 => (2, 0),
        0x59 => (1, 2),
        0x5a => (2, 3),
        0x5b => (3, 4),
        0x5c => (2, 4),
        0x5d => (3, 5),
        0x5e => (4, 6),
        0x5f => (2, 2),
        // binary arithmetic: long and double forms use two slots per operand
        byte @ 0x60..=0x73 => {
            if (byte - 0x60) % 2 == 1 {
                (4, 2)
            } else {
                (2, 1)
            }
        }
        byte @ 0x74..=0x77 => {
            let size = 1 + ((byte - 0x74) % 2) as usize;
            (size, size)
        }
        0x78 | 0x7a | 0x7c => (2, 1),
        0x79 | 0x7b | 0x7d => (3, 2),
        0x7e | 0x80 | 0x82 => (2, 1),
        0x7f | 0x81 | 0x83 => (4, 2),
        0x85 | 0x87 | 0x8c | 0x8d => (1, 2),
        0x86 | 0x8b | 0x91..=0x93 => (1, 1),
        0x88 | 0x89 | 0x8e | 0x90 => (2, 1),
        0x8a | 0x8f => (2, 2),
        0x94 | 0x97 | 0x98 => (4, 1),
        0x95 | 0x96 => (2, 1),
        0xac | 0xae | 0xb0 | 0xbf | 0xc2 | 0xc3 => (1, 0),
        0xad | 0xaf => (2, 0),
        0xbe => (1, 1),
        _ => (0, 0),
    }
}
