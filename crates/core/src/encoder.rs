//! Class file writer.
//!
//! Serializes a [`ClassModel`] back to bytes. Code is laid out in a loop that widens any jump
//! whose offset no longer fits 16 bits (`goto_w`, or an inverted conditional skipping over a
//! `goto_w`) until the layout is stable. Stack map frames and max stack/locals are either
//! recomputed ([`WriteMode::ComputeFrames`]) or, in [`WriteMode::ComputeMaxs`], taken from the
//! decoded frames with only the sizes recomputed.
use crate::constant_pool::{encode_modified_utf8, ConstantPoolBuilder};
use crate::frames::{self, FrameState, FrameValue, SuperclassResolver};
use crate::insn::{Insn, InsnList, Label, VerificationType, MAX_CODE_SIZE};
use crate::model::{Annotation, ClassModel, ElementValue, FieldModel, MethodModel};
use crate::opcode::Opcode;
use jarcloak_utils::errors::EncodeError;
use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;

const MAGIC: u32 = 0xCAFE_BABE;

/// How the writer obtains stack map frames and max stack/locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Infer frames and sizes from scratch.
    ComputeFrames,
    /// Keep decoded frames, recompute sizes only.
    ComputeMaxs,
}

trait Put {
    fn u1(&mut self, value: u8);
    fn u2(&mut self, value: u16);
    fn u4(&mut self, value: u32);
}

impl Put for Vec<u8> {
    fn u1(&mut self, value: u8) {
        self.push(value);
    }

    fn u2(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn u4(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }
}

fn count(len: usize, what: &'static str) -> Result<u16, EncodeError> {
    u16::try_from(len).map_err(|_| EncodeError::TooMany(what))
}

/// Attributes of one structure, collected before their count is known.
#[derive(Default)]
struct Attributes(Vec<(u16, Vec<u8>)>);

impl Attributes {
    fn add(
        &mut self,
        cp: &mut ConstantPoolBuilder,
        name: &str,
        body: Vec<u8>,
    ) -> Result<(), EncodeError> {
        self.0.push((cp.utf8(name)?, body));
        Ok(())
    }

    fn add_index(
        &mut self,
        cp: &mut ConstantPoolBuilder,
        name: &str,
        index: u16,
    ) -> Result<(), EncodeError> {
        self.add(cp, name, index.to_be_bytes().to_vec())
    }

    fn write(self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.u2(count(self.0.len(), "attributes")?);
        for (name, body) in self.0 {
            out.u2(name);
            out.u4(u32::try_from(body.len()).map_err(|_| EncodeError::TooMany("attribute bytes"))?);
            out.extend_from_slice(&body);
        }
        Ok(())
    }
}

/// Serializes `class`.
pub fn write_class(
    class: &ClassModel,
    mode: WriteMode,
    resolver: &mut dyn SuperclassResolver,
) -> Result<Vec<u8>, EncodeError> {
    let mut cp = ConstantPoolBuilder::new();
    let mut body = Vec::with_capacity(1024);

    body.u2(class.access);
    body.u2(cp.class(&class.name)?);
    body.u2(match &class.super_name {
        Some(name) => cp.class(name)?,
        None => 0,
    });
    body.u2(count(class.interfaces.len(), "interfaces")?);
    for interface in &class.interfaces {
        body.u2(cp.class(interface)?);
    }

    body.u2(count(class.fields.len(), "fields")?);
    for field in &class.fields {
        write_field(&mut cp, &mut body, field)?;
    }
    body.u2(count(class.methods.len(), "methods")?);
    for method in &class.methods {
        write_method(&mut cp, &mut body, class, method, mode, resolver)?;
    }

    let mut attributes = class_attributes(&mut cp, class)?;
    if cp.has_bootstrap_methods() {
        let mut table = Vec::new();
        cp.write_bootstrap_methods(&mut table);
        attributes.add(&mut cp, "BootstrapMethods", table)?;
    }
    attributes.write(&mut body)?;

    let mut out = Vec::with_capacity(body.len() + cp.count() * 8 + 10);
    out.u4(MAGIC);
    out.u2(class.version.minor);
    out.u2(class.version.major);
    cp.write(&mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

fn class_attributes(
    cp: &mut ConstantPoolBuilder,
    class: &ClassModel,
) -> Result<Attributes, EncodeError> {
    let mut attributes = Attributes::default();
    if let Some(source) = &class.source_file {
        let index = cp.utf8(source)?;
        attributes.add_index(cp, "SourceFile", index)?;
    }
    if let Some(debug) = &class.source_debug {
        attributes.add(cp, "SourceDebugExtension", encode_modified_utf8(debug))?;
    }
    if let Some(signature) = &class.signature {
        let index = cp.utf8(signature)?;
        attributes.add_index(cp, "Signature", index)?;
    }
    if !class.inner_classes.is_empty() {
        let mut table = Vec::new();
        table.u2(count(class.inner_classes.len(), "inner classes")?);
        for inner in &class.inner_classes {
            table.u2(cp.class(&inner.name)?);
            table.u2(match &inner.outer_name {
                Some(outer) => cp.class(outer)?,
                None => 0,
            });
            table.u2(match &inner.inner_name {
                Some(simple) => cp.utf8(simple)?,
                None => 0,
            });
            table.u2(inner.access);
        }
        attributes.add(cp, "InnerClasses", table)?;
    }
    if let Some(enclosing) = &class.enclosing_method {
        let mut data = Vec::with_capacity(4);
        data.u2(cp.class(&enclosing.owner)?);
        data.u2(match (&enclosing.name, &enclosing.desc) {
            (Some(name), Some(desc)) => cp.name_and_type(name, desc)?,
            _ => 0,
        });
        attributes.add(cp, "EnclosingMethod", data)?;
    }
    if let Some(host) = &class.nest_host {
        let index = cp.class(host)?;
        attributes.add_index(cp, "NestHost", index)?;
    }
    for (name, classes) in [
        ("NestMembers", &class.nest_members),
        ("PermittedSubclasses", &class.permitted_subclasses),
    ] {
        if classes.is_empty() {
            continue;
        }
        let mut data = Vec::new();
        data.u2(count(classes.len(), name)?);
        for member in classes {
            data.u2(cp.class(member)?);
        }
        attributes.add(cp, name, data)?;
    }
    annotation_attributes(
        cp,
        &mut attributes,
        &class.visible_annotations,
        &class.invisible_annotations,
    )?;
    if class.deprecated {
        attributes.add(cp, "Deprecated", Vec::new())?;
    }
    Ok(attributes)
}

fn write_field(
    cp: &mut ConstantPoolBuilder,
    out: &mut Vec<u8>,
    field: &FieldModel,
) -> Result<(), EncodeError> {
    out.u2(field.access);
    out.u2(cp.utf8(&field.name)?);
    out.u2(cp.utf8(&field.desc)?);
    let mut attributes = Attributes::default();
    if let Some(value) = &field.value {
        let index = cp.constant(value)?;
        attributes.add_index(cp, "ConstantValue", index)?;
    }
    if let Some(signature) = &field.signature {
        let index = cp.utf8(signature)?;
        attributes.add_index(cp, "Signature", index)?;
    }
    annotation_attributes(
        cp,
        &mut attributes,
        &field.visible_annotations,
        &field.invisible_annotations,
    )?;
    if field.deprecated {
        attributes.add(cp, "Deprecated", Vec::new())?;
    }
    attributes.write(out)
}

fn write_method(
    cp: &mut ConstantPoolBuilder,
    out: &mut Vec<u8>,
    class: &ClassModel,
    method: &MethodModel,
    mode: WriteMode,
    resolver: &mut dyn SuperclassResolver,
) -> Result<(), EncodeError> {
    out.u2(method.access);
    out.u2(cp.utf8(&method.name)?);
    out.u2(cp.utf8(&method.desc)?);
    let mut attributes = Attributes::default();
    if method.has_code() {
        let code = CodeWriter::new(cp, class, method).write(mode, resolver)?;
        attributes.add(cp, "Code", code)?;
    }
    if !method.exceptions.is_empty() {
        let mut data = Vec::new();
        data.u2(count(method.exceptions.len(), "exceptions")?);
        for exception in &method.exceptions {
            data.u2(cp.class(exception)?);
        }
        attributes.add(cp, "Exceptions", data)?;
    }
    if let Some(signature) = &method.signature {
        let index = cp.utf8(signature)?;
        attributes.add_index(cp, "Signature", index)?;
    }
    if !method.parameters.is_empty() {
        let mut data = Vec::new();
        data.u1(u8::try_from(method.parameters.len())
            .map_err(|_| EncodeError::TooMany("method parameters"))?);
        for parameter in &method.parameters {
            data.u2(match &parameter.name {
                Some(name) => cp.utf8(name)?,
                None => 0,
            });
            data.u2(parameter.access);
        }
        attributes.add(cp, "MethodParameters", data)?;
    }
    if let Some(default) = &method.annotation_default {
        let mut data = Vec::new();
        write_element_value(cp, &mut data, default)?;
        attributes.add(cp, "AnnotationDefault", data)?;
    }
    annotation_attributes(
        cp,
        &mut attributes,
        &method.visible_annotations,
        &method.invisible_annotations,
    )?;
    if method.deprecated {
        attributes.add(cp, "Deprecated", Vec::new())?;
    }
    attributes.write(out)
}

fn annotation_attributes(
    cp: &mut ConstantPoolBuilder,
    attributes: &mut Attributes,
    visible: &[Annotation],
    invisible: &[Annotation],
) -> Result<(), EncodeError> {
    for (name, annotations) in [
        ("RuntimeVisibleAnnotations", visible),
        ("RuntimeInvisibleAnnotations", invisible),
    ] {
        if annotations.is_empty() {
            continue;
        }
        let mut data = Vec::new();
        data.u2(count(annotations.len(), "annotations")?);
        for annotation in annotations {
            write_annotation(cp, &mut data, annotation)?;
        }
        attributes.add(cp, name, data)?;
    }
    Ok(())
}

fn write_annotation(
    cp: &mut ConstantPoolBuilder,
    out: &mut Vec<u8>,
    annotation: &Annotation,
) -> Result<(), EncodeError> {
    out.u2(cp.utf8(&annotation.desc)?);
    out.u2(count(annotation.values.len(), "annotation values")?);
    for (name, value) in &annotation.values {
        out.u2(cp.utf8(name)?);
        write_element_value(cp, out, value)?;
    }
    Ok(())
}

fn write_element_value(
    cp: &mut ConstantPoolBuilder,
    out: &mut Vec<u8>,
    value: &ElementValue,
) -> Result<(), EncodeError> {
    match value {
        ElementValue::Const(tag, constant) => {
            out.u1(*tag);
            let index = match (tag, constant) {
                (b's', crate::insn::Constant::String(text)) => cp.utf8(text)?,
                _ => cp.constant(constant)?,
            };
            out.u2(index);
        }
        ElementValue::Enum { desc, name } => {
            out.u1(b'e');
            out.u2(cp.utf8(desc)?);
            out.u2(cp.utf8(name)?);
        }
        ElementValue::Class(desc) => {
            out.u1(b'c');
            out.u2(cp.utf8(desc)?);
        }
        ElementValue::Annotation(annotation) => {
            out.u1(b'@');
            write_annotation(cp, out, annotation)?;
        }
        ElementValue::Array(values) => {
            out.u1(b'[');
            out.u2(count(values.len(), "array elements")?);
            for value in values {
                write_element_value(cp, out, value)?;
            }
        }
    }
    Ok(())
}

/// Serializes one method's `Code` attribute.
struct CodeWriter<'a> {
    cp: &'a mut ConstantPoolBuilder,
    class: &'a ClassModel,
    /// Owned once far conditionals have been rewritten.
    method: Cow<'a, MethodModel>,
    /// Constant pool operand of each instruction, interned up front so `ldc` sizes are known
    /// before layout.
    operands: Vec<u16>,
    /// Jumps that need the 32-bit form.
    wide: Vec<bool>,
    /// Byte offset of each instruction; the last entry is the code length.
    offsets: Vec<usize>,
    labels: HashMap<Label, usize>,
}

impl<'a> CodeWriter<'a> {
    fn new(
        cp: &'a mut ConstantPoolBuilder,
        class: &'a ClassModel,
        method: &'a MethodModel,
    ) -> Self {
        let mut writer = Self {
            cp,
            class,
            method: Cow::Borrowed(method),
            operands: Vec::new(),
            wide: Vec::new(),
            offsets: Vec::new(),
            labels: HashMap::new(),
        };
        writer.reset();
        writer
    }

    fn reset(&mut self) {
        let insns = self.method.instructions.as_slice();
        self.operands = vec![0; insns.len()];
        self.wide = insns
            .iter()
            .map(|insn| {
                matches!(
                    insn,
                    Insn::Jump {
                        opcode: Opcode::GOTO_W | Opcode::JSR_W,
                        ..
                    }
                )
            })
            .collect();
        self.offsets = vec![0; insns.len() + 1];
        self.labels.clear();
    }

    /// Rewrites every conditional jump that needs the 32-bit form into an inverted short jump
    /// over a `goto_w`, so the instruction after it becomes an ordinary branch target.
    fn expand_wide_conditionals(&self) -> Option<InsnList> {
        let insns = self.method.instructions.as_slice();
        let far = |index: usize| {
            self.wide[index]
                && matches!(&insns[index], Insn::Jump { opcode, .. } if opcode.is_conditional_jump())
        };
        if !(0..insns.len()).any(&far) {
            return None;
        }
        let mut out = Vec::with_capacity(insns.len() + 8);
        for (index, insn) in insns.iter().enumerate() {
            match insn {
                Insn::Jump { opcode, target } if far(index) => {
                    let skip = Label::new();
                    // is_conditional_jump guarantees an inverse
                    let inverted = opcode.inverted().unwrap_or(*opcode);
                    out.push(Insn::jump(inverted, skip));
                    out.push(Insn::jump(Opcode::GOTO_W, *target));
                    out.push(Insn::Label(skip));
                }
                other => out.push(other.clone()),
            }
        }
        Some(out.into())
    }

    fn method_id(&self) -> String {
        format!("{}.{}{}", self.class.name, self.method.name, self.method.desc)
    }

    fn write(
        mut self,
        mode: WriteMode,
        resolver: &mut dyn SuperclassResolver,
    ) -> Result<Vec<u8>, EncodeError> {
        self.intern_operands()?;
        self.layout()?;
        if let Some(instructions) = self.expand_wide_conditionals() {
            self.method.to_mut().instructions = instructions;
            self.reset();
            self.intern_operands()?;
            self.layout()?;
        }

        let frames_wanted = self.class.version.requires_frames();
        let frame_error = |source| EncodeError::Frames {
            method: self.method_id(),
            source,
        };
        let (max_stack, max_locals, frames, unreachable) =
            if mode == WriteMode::ComputeFrames && frames_wanted {
                let analysis = frames::analyze(&self.class.name, &self.method, resolver)
                    .map_err(frame_error)?;
                let frames = analysis
                    .frames
                    .iter()
                    .map(|(index, state)| self.offset_frame(*index, state))
                    .collect::<Vec<_>>();
                let unreachable = analysis
                    .unreachable
                    .iter()
                    .map(|range| self.offsets[range.start]..self.offsets[range.end])
                    .collect::<Vec<_>>();
                (analysis.max_stack, analysis.max_locals, frames, unreachable)
            } else {
                let max_stack = frames::max_stack(&self.method).map_err(frame_error)?;
                let max_locals = frames::max_locals(&self.method)
                    .map_err(frame_error)?
                    .max(self.method.max_locals);
                let frames = if frames_wanted {
                    self.decoded_frames()?
                } else {
                    Vec::new()
                };
                (max_stack, max_locals, frames, Vec::new())
            };

        let mut code = self.emit()?;
        for range in &unreachable {
            if range.is_empty() {
                continue;
            }
            code[range.clone()].fill(Opcode::NOP.to_byte());
            code[range.end - 1] = Opcode::ATHROW.to_byte();
        }

        let mut out = Vec::with_capacity(code.len() + 64);
        out.u2(max_stack);
        out.u2(max_locals);
        out.u4(code.len() as u32);
        out.extend_from_slice(&code);
        self.write_exception_table(&mut out, &unreachable)?;

        let mut attributes = Attributes::default();
        self.debug_attributes(&mut attributes)?;
        if !frames.is_empty() {
            let initial = frames::initial_frame(&self.class.name, &self.method)
                .map_err(|source| EncodeError::Frames {
                    method: self.method_id(),
                    source,
                })?;
            let table = self.stack_map_table(&initial.compact_locals(), &frames)?;
            attributes.add(self.cp, "StackMapTable", table)?;
        }
        attributes.write(&mut out)?;
        Ok(out)
    }

    fn intern_operands(&mut self) -> Result<(), EncodeError> {
        for (index, insn) in self.method.instructions.iter().enumerate() {
            self.operands[index] = match insn {
                Insn::Type { class, .. } => self.cp.class(class)?,
                Insn::MultiANewArray { desc, .. } => self.cp.class(desc)?,
                Insn::Field {
                    owner, name, desc, ..
                } => self.cp.field_ref(owner, name, desc)?,
                Insn::Method {
                    owner,
                    name,
                    desc,
                    interface,
                    ..
                } => self.cp.method_ref(owner, name, desc, *interface)?,
                Insn::InvokeDynamic {
                    name,
                    desc,
                    bootstrap,
                    args,
                } => self.cp.invoke_dynamic(name, desc, bootstrap, args)?,
                Insn::Ldc(constant) => self.cp.constant(constant)?,
                _ => 0,
            };
        }
        Ok(())
    }

    fn size_at(&self, index: usize, offset: usize) -> usize {
        let insn = &self.method.instructions[index];
        match insn {
            Insn::Jump { opcode, .. } if self.wide[index] => {
                if opcode.is_conditional_jump() {
                    8
                } else {
                    5
                }
            }
            Insn::Jump { .. } => 3,
            Insn::Ldc(constant) => {
                if !constant.is_wide() && self.operands[index] <= 0xff {
                    2
                } else {
                    3
                }
            }
            Insn::TableSwitch { targets, .. } => 1 + switch_padding(offset) + 12 + 4 * targets.len(),
            Insn::LookupSwitch { keys, .. } => 1 + switch_padding(offset) + 8 + 8 * keys.len(),
            _ => insn.max_size(),
        }
    }

    fn label_offset(&self, label: Label) -> Result<usize, EncodeError> {
        self.labels
            .get(&label)
            .map(|index| self.offsets[*index])
            .ok_or_else(|| EncodeError::UnknownLabel(self.method_id()))
    }

    /// Assigns offsets, widening jumps until every branch fits.
    fn layout(&mut self) -> Result<(), EncodeError> {
        for (index, insn) in self.method.instructions.iter().enumerate() {
            if let Insn::Label(label) = insn {
                self.labels.insert(*label, index);
            }
        }
        loop {
            let mut offset = 0;
            for index in 0..self.method.instructions.len() {
                self.offsets[index] = offset;
                offset += self.size_at(index, offset);
            }
            self.offsets[self.method.instructions.len()] = offset;
            if offset > MAX_CODE_SIZE {
                return Err(EncodeError::MethodTooLarge {
                    method: self.method_id(),
                    size: offset,
                    limit: MAX_CODE_SIZE,
                });
            }

            let mut changed = false;
            for index in 0..self.method.instructions.len() {
                if let Insn::Jump { target, .. } = &self.method.instructions[index] {
                    if self.wide[index] {
                        continue;
                    }
                    let delta = self.label_offset(*target)? as i64 - self.offsets[index] as i64;
                    if i16::try_from(delta).is_err() {
                        self.wide[index] = true;
                        changed = true;
                    }
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    fn emit(&self) -> Result<Vec<u8>, EncodeError> {
        let mut code = Vec::with_capacity(self.offsets[self.method.instructions.len()]);
        for (index, insn) in self.method.instructions.iter().enumerate() {
            let at = self.offsets[index];
            let operand = self.operands[index];
            let relative =
                |label: Label| -> Result<i32, EncodeError> { Ok((self.label_offset(label)? as i64 - at as i64) as i32) };
            match insn {
                Insn::Label(_) | Insn::Frame(_) => {}
                Insn::Op(opcode) => code.u1(opcode.to_byte()),
                Insn::Int { opcode, operand } => {
                    code.u1(opcode.to_byte());
                    if *opcode == Opcode::SIPUSH {
                        code.u2(*operand as i16 as u16);
                    } else {
                        code.u1(*operand as i8 as u8);
                    }
                }
                Insn::Var { opcode, index: slot } => {
                    if let Some(short) = opcode.short_var_form(*slot) {
                        code.u1(short);
                    } else if let Ok(slot) = u8::try_from(*slot) {
                        code.u1(opcode.to_byte());
                        code.u1(slot);
                    } else {
                        code.u1(Opcode::WIDE.to_byte());
                        code.u1(opcode.to_byte());
                        code.u2(*slot);
                    }
                }
                Insn::Iinc { index: slot, delta } => match (u8::try_from(*slot), i8::try_from(*delta)) {
                    (Ok(slot), Ok(delta)) => {
                        code.u1(Opcode::IINC.to_byte());
                        code.u1(slot);
                        code.u1(delta as u8);
                    }
                    _ => {
                        code.u1(Opcode::WIDE.to_byte());
                        code.u1(Opcode::IINC.to_byte());
                        code.u2(*slot);
                        code.u2(*delta as u16);
                    }
                },
                Insn::Type { opcode, .. } | Insn::Field { opcode, .. } => {
                    code.u1(opcode.to_byte());
                    code.u2(operand);
                }
                Insn::Method { opcode, desc, .. } => {
                    code.u1(opcode.to_byte());
                    code.u2(operand);
                    if *opcode == Opcode::INVOKEINTERFACE {
                        let slots = crate::descriptor::argument_slots(desc).map_err(|source| {
                            EncodeError::Frames {
                                method: self.method_id(),
                                source,
                            }
                        })?;
                        code.u1(u8::try_from(slots + 1).map_err(|_| EncodeError::TooMany("arguments"))?);
                        code.u1(0);
                    }
                }
                Insn::InvokeDynamic { .. } => {
                    code.u1(Opcode::INVOKEDYNAMIC.to_byte());
                    code.u2(operand);
                    code.u2(0);
                }
                Insn::Jump { opcode, target } => {
                    let opcode = match opcode {
                        Opcode::GOTO_W => Opcode::GOTO,
                        Opcode::JSR_W => Opcode::JSR,
                        other => *other,
                    };
                    if !self.wide[index] {
                        code.u1(opcode.to_byte());
                        code.u2(relative(*target)? as i16 as u16);
                    } else if let Some(inverted) = opcode.inverted() {
                        // Skip the goto_w when the original condition is false.
                        code.u1(inverted.to_byte());
                        code.u2(8);
                        code.u1(Opcode::GOTO_W.to_byte());
                        code.u4((relative(*target)? - 3) as u32);
                    } else {
                        let wide = if opcode == Opcode::JSR {
                            Opcode::JSR_W
                        } else {
                            Opcode::GOTO_W
                        };
                        code.u1(wide.to_byte());
                        code.u4(relative(*target)? as u32);
                    }
                }
                Insn::Ldc(constant) => {
                    if constant.is_wide() {
                        code.u1(Opcode::LDC2_W.to_byte());
                        code.u2(operand);
                    } else if let Ok(small) = u8::try_from(operand) {
                        code.u1(Opcode::LDC.to_byte());
                        code.u1(small);
                    } else {
                        code.u1(Opcode::LDC_W.to_byte());
                        code.u2(operand);
                    }
                }
                Insn::TableSwitch {
                    low,
                    high,
                    default,
                    targets,
                } => {
                    code.u1(Opcode::TABLESWITCH.to_byte());
                    code.resize(code.len() + switch_padding(at), 0);
                    code.u4(relative(*default)? as u32);
                    code.u4(*low as u32);
                    code.u4(*high as u32);
                    for target in targets {
                        code.u4(relative(*target)? as u32);
                    }
                }
                Insn::LookupSwitch {
                    default,
                    keys,
                    targets,
                } => {
                    code.u1(Opcode::LOOKUPSWITCH.to_byte());
                    code.resize(code.len() + switch_padding(at), 0);
                    code.u4(relative(*default)? as u32);
                    code.u4(keys.len() as u32);
                    let mut pairs: Vec<(i32, Label)> =
                        keys.iter().copied().zip(targets.iter().copied()).collect();
                    pairs.sort_by_key(|(key, _)| *key);
                    for (key, target) in pairs {
                        code.u4(key as u32);
                        code.u4(relative(target)? as u32);
                    }
                }
                Insn::MultiANewArray { dims, .. } => {
                    code.u1(Opcode::MULTIANEWARRAY.to_byte());
                    code.u2(operand);
                    code.u1(*dims);
                }
            }
        }
        Ok(code)
    }

    fn write_exception_table(
        &mut self,
        out: &mut Vec<u8>,
        unreachable: &[Range<usize>],
    ) -> Result<(), EncodeError> {
        let mut entries = Vec::new();
        for block in &self.method.try_catch_blocks {
            let start = self.label_offset(block.start)?;
            let end = self.label_offset(block.end)?;
            let handler = self.label_offset(block.handler)?;
            if unreachable.iter().any(|dead| dead.contains(&handler)) {
                continue;
            }
            let catch_type = match &block.catch_type {
                Some(name) => self.cp.class(name)?,
                None => 0,
            };
            for range in subtract(start..end, unreachable) {
                entries.push((range.start as u16, range.end as u16, handler as u16, catch_type));
            }
        }
        out.u2(count(entries.len(), "exception handlers")?);
        for (start, end, handler, catch_type) in entries {
            out.u2(start);
            out.u2(end);
            out.u2(handler);
            out.u2(catch_type);
        }
        Ok(())
    }

    fn debug_attributes(&mut self, attributes: &mut Attributes) -> Result<(), EncodeError> {
        if !self.method.line_numbers.is_empty() {
            let mut data = Vec::new();
            data.u2(count(self.method.line_numbers.len(), "line numbers")?);
            for line in &self.method.line_numbers {
                data.u2(self.label_offset(line.start)? as u16);
                data.u2(line.line);
            }
            attributes.add(self.cp, "LineNumberTable", data)?;
        }
        if self.method.local_variables.is_empty() {
            return Ok(());
        }
        let mut table = Vec::new();
        let mut typed = Vec::new();
        for local in &self.method.local_variables {
            let start = self.label_offset(local.start)?;
            let end = self.label_offset(local.end)?;
            if end < start {
                continue;
            }
            let name = self.cp.utf8(&local.name)?;
            table.push((start as u16, (end - start) as u16, name, self.cp.utf8(&local.desc)?, local.index));
            if let Some(signature) = &local.signature {
                typed.push((start as u16, (end - start) as u16, name, self.cp.utf8(signature)?, local.index));
            }
        }
        for (attribute, entries) in [("LocalVariableTable", table), ("LocalVariableTypeTable", typed)] {
            if entries.is_empty() {
                continue;
            }
            let mut data = Vec::new();
            data.u2(count(entries.len(), "local variables")?);
            for (start, length, name, desc, index) in entries {
                data.u2(start);
                data.u2(length);
                data.u2(name);
                data.u2(desc);
                data.u2(index);
            }
            attributes.add(self.cp, attribute, data)?;
        }
        Ok(())
    }

    /// Converts an inferred frame to byte offsets with compacted locals.
    fn offset_frame(&self, index: usize, state: &FrameState) -> (usize, Vec<FrameValue>, Vec<FrameValue>) {
        let relocate = |value: FrameValue| match value {
            FrameValue::Uninitialized(at) => FrameValue::Uninitialized(self.offsets[at]),
            other => other,
        };
        (
            self.offsets[index],
            state.compact_locals().into_iter().map(relocate).collect(),
            state.stack.iter().cloned().map(relocate).collect(),
        )
    }

    /// Frames carried over from the input, positioned at the instruction that follows them.
    fn decoded_frames(&self) -> Result<Vec<(usize, Vec<FrameValue>, Vec<FrameValue>)>, EncodeError> {
        let convert = |value: &VerificationType| -> Result<FrameValue, EncodeError> {
            Ok(match value {
                VerificationType::Top => FrameValue::Top,
                VerificationType::Integer => FrameValue::Integer,
                VerificationType::Float => FrameValue::Float,
                VerificationType::Long => FrameValue::Long,
                VerificationType::Double => FrameValue::Double,
                VerificationType::Null => FrameValue::Null,
                VerificationType::UninitializedThis => FrameValue::UninitializedThis,
                VerificationType::Object(name) => FrameValue::Object(name.clone()),
                VerificationType::Uninitialized(label) => {
                    FrameValue::Uninitialized(self.label_offset(*label)?)
                }
            })
        };
        let mut frames: Vec<(usize, Vec<FrameValue>, Vec<FrameValue>)> = Vec::new();
        for (index, insn) in self.method.instructions.iter().enumerate() {
            if let Insn::Frame(frame) = insn {
                let offset = self.offsets[index];
                let locals = frame.locals.iter().map(convert).collect::<Result<_, _>>()?;
                let stack = frame.stack.iter().map(convert).collect::<Result<_, _>>()?;
                if frames.last().is_some_and(|(last, _, _)| *last == offset) {
                    frames.pop();
                }
                frames.push((offset, locals, stack));
            }
        }
        Ok(frames)
    }

    fn stack_map_table(
        &mut self,
        initial: &[FrameValue],
        frames: &[(usize, Vec<FrameValue>, Vec<FrameValue>)],
    ) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        out.u2(count(frames.len(), "stack map frames")?);
        let mut previous_locals = initial.to_vec();
        let mut previous_offset: Option<usize> = None;
        for (offset, locals, stack) in frames {
            let delta = match previous_offset {
                None => *offset,
                Some(previous) => offset - previous - 1,
            };
            let delta = u16::try_from(delta).map_err(|_| EncodeError::TooMany("frame offset"))?;
            previous_offset = Some(*offset);
            let same_locals = *locals == previous_locals;
            let prefix = locals.len().min(previous_locals.len());
            let shares_prefix = locals[..prefix] == previous_locals[..prefix];
            if same_locals && stack.is_empty() {
                if delta < 64 {
                    out.u1(delta as u8);
                } else {
                    out.u1(251);
                    out.u2(delta);
                }
            } else if same_locals && stack.len() == 1 {
                if delta < 64 {
                    out.u1(64 + delta as u8);
                } else {
                    out.u1(247);
                    out.u2(delta);
                }
                self.verification_type(&mut out, &stack[0])?;
            } else if stack.is_empty()
                && shares_prefix
                && locals.len() > previous_locals.len()
                && locals.len() - previous_locals.len() <= 3
            {
                out.u1((251 + locals.len() - previous_locals.len()) as u8);
                out.u2(delta);
                for value in &locals[previous_locals.len()..] {
                    self.verification_type(&mut out, value)?;
                }
            } else if stack.is_empty()
                && shares_prefix
                && locals.len() < previous_locals.len()
                && previous_locals.len() - locals.len() <= 3
            {
                out.u1((251 - (previous_locals.len() - locals.len())) as u8);
                out.u2(delta);
            } else {
                out.u1(255);
                out.u2(delta);
                out.u2(count(locals.len(), "frame locals")?);
                for value in locals {
                    self.verification_type(&mut out, value)?;
                }
                out.u2(count(stack.len(), "frame stack entries")?);
                for value in stack {
                    self.verification_type(&mut out, value)?;
                }
            }
            previous_locals.clone_from(locals);
        }
        Ok(out)
    }

    fn verification_type(&mut self, out: &mut Vec<u8>, value: &FrameValue) -> Result<(), EncodeError> {
        match value {
            FrameValue::Top => out.u1(0),
            FrameValue::Integer => out.u1(1),
            FrameValue::Float => out.u1(2),
            FrameValue::Double => out.u1(3),
            FrameValue::Long => out.u1(4),
            FrameValue::Null => out.u1(5),
            FrameValue::UninitializedThis => out.u1(6),
            FrameValue::Object(name) => {
                out.u1(7);
                out.u2(self.cp.class(name)?);
            }
            FrameValue::Uninitialized(offset) => {
                out.u1(8);
                out.u2(*offset as u16);
            }
        }
        Ok(())
    }
}

/// Padding after a switch opcode at `offset` so its operands start 4-byte aligned.
const fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

/// Removes the `holes` from `range`, keeping the non-empty pieces in order.
fn subtract(range: Range<usize>, holes: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut pieces = vec![range];
    for hole in holes {
        pieces = pieces
            .into_iter()
            .flat_map(|piece| {
                let before = piece.start..piece.end.min(hole.start);
                let after = piece.start.max(hole.end)..piece.end;
                [before, after]
            })
            .filter(|piece| !piece.is_empty())
            .collect();
    }
    pieces
}
