//! Class file reader.
//!
//! Parses a class file into a [`ClassModel`]. Branch offsets, exception ranges, debug tables
//! and stack map frames are turned into [`Label`] references so the instruction list can be
//! edited freely afterwards. Attributes the model does not carry are dropped with a debug log.
use crate::classpath::ClassHeader;
use crate::constant_pool::{decode_modified_utf8, tag, ConstantPool, CpEntry};
use crate::descriptor::{self, FieldType};
use crate::insn::{Constant, FrameNode, Insn, InsnList, Label, VerificationType};
use crate::model::{
    access, Annotation, ClassModel, ClassVersion, ElementValue, EnclosingMethod, FieldModel,
    InnerClass, LineNumber, LocalVariable, MethodModel, Parameter, TryCatchBlock,
};
use crate::opcode::Opcode;
use jarcloak_utils::errors::DecodeError;
use tracing::debug;

const MAGIC: u32 = 0xCAFE_BABE;

/// Big-endian cursor over class file bytes.
#[derive(Debug, Clone)]
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u1(&mut self) -> Result<u8, DecodeError> {
        Ok(self.bytes(1)?[0])
    }

    fn u2(&mut self) -> Result<u16, DecodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u4(&mut self) -> Result<u32, DecodeError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i1(&mut self) -> Result<i8, DecodeError> {
        Ok(self.u1()? as i8)
    }

    fn i2(&mut self) -> Result<i16, DecodeError> {
        Ok(self.u2()? as i16)
    }

    fn i4(&mut self) -> Result<i32, DecodeError> {
        Ok(self.u4()? as i32)
    }

    fn u8(&mut self) -> Result<u64, DecodeError> {
        Ok((u64::from(self.u4()?) << 32) | u64::from(self.u4()?))
    }

    const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// An attribute whose body has not been interpreted yet.
#[derive(Debug, Clone)]
struct RawAttribute<'a> {
    name: String,
    data: &'a [u8],
}

/// A member before its attributes are interpreted.
#[derive(Debug)]
struct RawMember<'a> {
    access: u16,
    name: String,
    desc: String,
    attributes: Vec<RawAttribute<'a>>,
}

fn read_constant_pool(r: &mut Reader<'_>) -> Result<ConstantPool, DecodeError> {
    let count = r.u2()? as usize;
    let mut entries = Vec::with_capacity(count);
    entries.push(CpEntry::Unusable);
    while entries.len() < count {
        let entry_tag = r.u1()?;
        let entry = match entry_tag {
            tag::UTF8 => {
                let len = r.u2()? as usize;
                CpEntry::Utf8(decode_modified_utf8(r.bytes(len)?)?)
            }
            tag::INTEGER => CpEntry::Integer(r.i4()?),
            tag::FLOAT => CpEntry::Float(f32::from_bits(r.u4()?)),
            tag::LONG => CpEntry::Long(r.u8()? as i64),
            tag::DOUBLE => CpEntry::Double(f64::from_bits(r.u8()?)),
            tag::CLASS => CpEntry::Class(r.u2()?),
            tag::STRING => CpEntry::String(r.u2()?),
            tag::FIELDREF => CpEntry::FieldRef(r.u2()?, r.u2()?),
            tag::METHODREF => CpEntry::MethodRef(r.u2()?, r.u2()?),
            tag::INTERFACE_METHODREF => CpEntry::InterfaceMethodRef(r.u2()?, r.u2()?),
            tag::NAME_AND_TYPE => CpEntry::NameAndType(r.u2()?, r.u2()?),
            tag::METHOD_HANDLE => CpEntry::MethodHandle(r.u1()?, r.u2()?),
            tag::METHOD_TYPE => CpEntry::MethodType(r.u2()?),
            tag::DYNAMIC => CpEntry::Dynamic(r.u2()?, r.u2()?),
            tag::INVOKE_DYNAMIC => CpEntry::InvokeDynamic(r.u2()?, r.u2()?),
            tag::MODULE => CpEntry::Module(r.u2()?),
            tag::PACKAGE => CpEntry::Package(r.u2()?),
            other => return Err(DecodeError::UnsupportedConstantTag(other)),
        };
        let wide = matches!(entry, CpEntry::Long(_) | CpEntry::Double(_));
        entries.push(entry);
        if wide {
            entries.push(CpEntry::Unusable);
        }
    }
    Ok(ConstantPool::new(entries))
}

fn read_attributes<'a>(
    r: &mut Reader<'a>,
    cp: &ConstantPool,
) -> Result<Vec<RawAttribute<'a>>, DecodeError> {
    let count = r.u2()?;
    (0..count)
        .map(|_| {
            let name = cp.utf8(r.u2()?)?.to_string();
            let len = r.u4()? as usize;
            Ok(RawAttribute {
                name,
                data: r.bytes(len)?,
            })
        })
        .collect()
}

fn read_members<'a>(
    r: &mut Reader<'a>,
    cp: &ConstantPool,
) -> Result<Vec<RawMember<'a>>, DecodeError> {
    let count = r.u2()?;
    (0..count)
        .map(|_| {
            let access = r.u2()?;
            let name = cp.utf8(r.u2()?)?.to_string();
            let desc = cp.utf8(r.u2()?)?.to_string();
            Ok(RawMember {
                access,
                name,
                desc,
                attributes: read_attributes(r, cp)?,
            })
        })
        .collect()
}

/// Reads only the class header: name, super class, interfaces and access flags.
pub fn read_header(bytes: &[u8]) -> Result<ClassHeader, DecodeError> {
    let mut r = Reader::new(bytes);
    let magic = r.u4()?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    r.u2()?;
    r.u2()?;
    let cp = read_constant_pool(&mut r)?;
    let access = r.u2()?;
    let name = cp.class_name(r.u2()?)?.to_string();
    let super_name = cp.optional_class(r.u2()?)?;
    let count = r.u2()?;
    let interfaces = (0..count)
        .map(|_| Ok(cp.class_name(r.u2()?)?.to_string()))
        .collect::<Result<Vec<_>, DecodeError>>()?;
    Ok(ClassHeader {
        name,
        super_name,
        interfaces,
        access,
    })
}

/// Parses a complete class file.
pub fn read_class(bytes: &[u8]) -> Result<ClassModel, DecodeError> {
    let mut r = Reader::new(bytes);
    let magic = r.u4()?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let minor = r.u2()?;
    let major = r.u2()?;
    let cp = read_constant_pool(&mut r)?;
    let access = r.u2()?;
    let name = cp.class_name(r.u2()?)?.to_string();
    let super_name = cp.optional_class(r.u2()?)?;
    let interface_count = r.u2()?;
    let interfaces = (0..interface_count)
        .map(|_| Ok(cp.class_name(r.u2()?)?.to_string()))
        .collect::<Result<Vec<_>, DecodeError>>()?;
    let raw_fields = read_members(&mut r, &cp)?;
    let raw_methods = read_members(&mut r, &cp)?;
    let class_attributes = read_attributes(&mut r, &cp)?;
    if r.remaining() != 0 {
        debug!("{} trailing bytes after class {}", r.remaining(), name);
    }

    let bootstrap = match class_attributes
        .iter()
        .find(|a| a.name == "BootstrapMethods")
    {
        Some(attr) => read_bootstrap_table(attr.data)?,
        None => Vec::new(),
    };
    let ctx = Context {
        cp: &cp,
        bootstrap: &bootstrap,
        class_name: &name,
    };

    let mut class = ClassModel::new(&name, super_name.as_deref());
    class.version = ClassVersion { major, minor };
    class.access = access;
    class.interfaces = interfaces;

    for attr in &class_attributes {
        let mut a = Reader::new(attr.data);
        match attr.name.as_str() {
            "SourceFile" => class.source_file = cp.optional_utf8(a.u2()?)?,
            "SourceDebugExtension" => {
                class.source_debug = Some(decode_modified_utf8(attr.data)?);
            }
            "Signature" => class.signature = cp.optional_utf8(a.u2()?)?,
            "InnerClasses" => {
                let count = a.u2()?;
                for _ in 0..count {
                    class.inner_classes.push(InnerClass {
                        name: cp.class_name(a.u2()?)?.to_string(),
                        outer_name: cp.optional_class(a.u2()?)?,
                        inner_name: cp.optional_utf8(a.u2()?)?,
                        access: a.u2()?,
                    });
                }
            }
            "EnclosingMethod" => {
                let owner = cp.class_name(a.u2()?)?.to_string();
                let nat = a.u2()?;
                let (name, desc) = if nat == 0 {
                    (None, None)
                } else {
                    let (n, d) = cp.name_and_type(nat)?;
                    (Some(n.to_string()), Some(d.to_string()))
                };
                class.enclosing_method = Some(EnclosingMethod { owner, name, desc });
            }
            "NestHost" => class.nest_host = Some(cp.class_name(a.u2()?)?.to_string()),
            "NestMembers" | "PermittedSubclasses" => {
                let count = a.u2()?;
                let names = (0..count)
                    .map(|_| Ok(cp.class_name(a.u2()?)?.to_string()))
                    .collect::<Result<Vec<_>, DecodeError>>()?;
                if attr.name == "NestMembers" {
                    class.nest_members = names;
                } else {
                    class.permitted_subclasses = names;
                }
            }
            "RuntimeVisibleAnnotations" => {
                class.visible_annotations = ctx.annotations(attr.data)?;
            }
            "RuntimeInvisibleAnnotations" => {
                class.invisible_annotations = ctx.annotations(attr.data)?;
            }
            "Deprecated" => class.deprecated = true,
            "Synthetic" => class.access |= access::SYNTHETIC,
            "BootstrapMethods" => {}
            other => debug!("dropping class attribute {} of {}", other, name),
        }
    }

    class.fields = raw_fields
        .into_iter()
        .map(|raw| ctx.field(raw))
        .collect::<Result<_, _>>()?;
    class.methods = raw_methods
        .into_iter()
        .map(|raw| ctx.method(raw))
        .collect::<Result<_, _>>()?;
    Ok(class)
}

fn read_bootstrap_table(data: &[u8]) -> Result<Vec<(u16, Vec<u16>)>, DecodeError> {
    let mut r = Reader::new(data);
    let count = r.u2()?;
    (0..count)
        .map(|_| {
            let handle = r.u2()?;
            let argc = r.u2()?;
            let args = (0..argc).map(|_| r.u2()).collect::<Result<Vec<_>, _>>()?;
            Ok((handle, args))
        })
        .collect()
}

/// Shared state while interpreting one class.
struct Context<'a> {
    cp: &'a ConstantPool,
    bootstrap: &'a [(u16, Vec<u16>)],
    class_name: &'a str,
}

impl Context<'_> {
    fn constant(&self, index: u16) -> Result<Constant, DecodeError> {
        self.cp.constant(index, self.bootstrap)
    }

    fn annotations(&self, data: &[u8]) -> Result<Vec<Annotation>, DecodeError> {
        let mut r = Reader::new(data);
        let count = r.u2()?;
        (0..count).map(|_| self.annotation(&mut r)).collect()
    }

    fn annotation(&self, r: &mut Reader<'_>) -> Result<Annotation, DecodeError> {
        let desc = self.cp.utf8(r.u2()?)?.to_string();
        let count = r.u2()?;
        let values = (0..count)
            .map(|_| {
                let name = self.cp.utf8(r.u2()?)?.to_string();
                Ok((name, self.element_value(r)?))
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;
        Ok(Annotation { desc, values })
    }

    fn element_value(&self, r: &mut Reader<'_>) -> Result<ElementValue, DecodeError> {
        let element_tag = r.u1()?;
        Ok(match element_tag {
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => {
                ElementValue::Const(element_tag, self.constant(r.u2()?)?)
            }
            b's' => ElementValue::Const(
                element_tag,
                Constant::String(self.cp.utf8(r.u2()?)?.to_string()),
            ),
            b'e' => ElementValue::Enum {
                desc: self.cp.utf8(r.u2()?)?.to_string(),
                name: self.cp.utf8(r.u2()?)?.to_string(),
            },
            b'c' => ElementValue::Class(self.cp.utf8(r.u2()?)?.to_string()),
            b'@' => ElementValue::Annotation(self.annotation(r)?),
            b'[' => {
                let count = r.u2()?;
                ElementValue::Array(
                    (0..count)
                        .map(|_| self.element_value(r))
                        .collect::<Result<_, _>>()?,
                )
            }
            _ => return Err(DecodeError::InvalidAttribute("annotation".into())),
        })
    }

    fn field(&self, raw: RawMember<'_>) -> Result<FieldModel, DecodeError> {
        let mut field = FieldModel::new(raw.access, &raw.name, &raw.desc);
        for attr in &raw.attributes {
            let mut a = Reader::new(attr.data);
            match attr.name.as_str() {
                "ConstantValue" => field.value = Some(self.constant(a.u2()?)?),
                "Signature" => field.signature = self.cp.optional_utf8(a.u2()?)?,
                "RuntimeVisibleAnnotations" => {
                    field.visible_annotations = self.annotations(attr.data)?;
                }
                "RuntimeInvisibleAnnotations" => {
                    field.invisible_annotations = self.annotations(attr.data)?;
                }
                "Deprecated" => field.deprecated = true,
                "Synthetic" => field.access |= access::SYNTHETIC,
                other => debug!(
                    "dropping field attribute {} of {}.{}",
                    other, self.class_name, raw.name
                ),
            }
        }
        Ok(field)
    }

    fn method(&self, raw: RawMember<'_>) -> Result<MethodModel, DecodeError> {
        let mut method = MethodModel::new(raw.access, &raw.name, &raw.desc);
        for attr in &raw.attributes {
            let mut a = Reader::new(attr.data);
            match attr.name.as_str() {
                "Code" => self.code(&mut method, attr.data)?,
                "Exceptions" => {
                    let count = a.u2()?;
                    method.exceptions = (0..count)
                        .map(|_| Ok(self.cp.class_name(a.u2()?)?.to_string()))
                        .collect::<Result<_, DecodeError>>()?;
                }
                "Signature" => method.signature = self.cp.optional_utf8(a.u2()?)?,
                "MethodParameters" => {
                    let count = a.u1()?;
                    method.parameters = (0..count)
                        .map(|_| {
                            Ok(Parameter {
                                name: self.cp.optional_utf8(a.u2()?)?,
                                access: a.u2()?,
                            })
                        })
                        .collect::<Result<_, DecodeError>>()?;
                }
                "RuntimeVisibleAnnotations" => {
                    method.visible_annotations = self.annotations(attr.data)?;
                }
                "RuntimeInvisibleAnnotations" => {
                    method.invisible_annotations = self.annotations(attr.data)?;
                }
                "AnnotationDefault" => method.annotation_default = Some(self.element_value(&mut a)?),
                "Deprecated" => method.deprecated = true,
                "Synthetic" => method.access |= access::SYNTHETIC,
                other => debug!(
                    "dropping method attribute {} of {}.{}{}",
                    other, self.class_name, raw.name, raw.desc
                ),
            }
        }
        Ok(method)
    }

    fn code(&self, method: &mut MethodModel, data: &[u8]) -> Result<(), DecodeError> {
        let mut r = Reader::new(data);
        method.max_stack = r.u2()?;
        method.max_locals = r.u2()?;
        let code_len = r.u4()? as usize;
        let code = r.bytes(code_len)?;
        let mut labels = Labels::new(code_len);

        let mut decoded = Vec::new();
        let mut pos = 0;
        while pos < code_len {
            let (insn, next) = self.instruction(code, pos, &mut labels)?;
            decoded.push((pos, insn));
            pos = next;
        }

        let handler_count = r.u2()?;
        for _ in 0..handler_count {
            let start = labels.at(r.u2()? as i64)?;
            let end = labels.at(r.u2()? as i64)?;
            let handler = labels.at(r.u2()? as i64)?;
            let catch_type = self.cp.optional_class(r.u2()?)?;
            method.try_catch_blocks.push(TryCatchBlock {
                start,
                end,
                handler,
                catch_type,
            });
        }

        let mut frames: Vec<(usize, FrameNode)> = Vec::new();
        for attr in read_attributes(&mut r, self.cp)? {
            let mut a = Reader::new(attr.data);
            match attr.name.as_str() {
                "LineNumberTable" => {
                    let count = a.u2()?;
                    for _ in 0..count {
                        let pc = a.u2()?;
                        let line = a.u2()?;
                        method.line_numbers.push(LineNumber {
                            line,
                            start: labels.at(pc as i64)?,
                        });
                    }
                }
                "LocalVariableTable" => {
                    let count = a.u2()?;
                    for _ in 0..count {
                        let start_pc = a.u2()? as i64;
                        let length = a.u2()? as i64;
                        let name = self.cp.utf8(a.u2()?)?.to_string();
                        let desc = self.cp.utf8(a.u2()?)?.to_string();
                        let index = a.u2()?;
                        method.local_variables.push(LocalVariable {
                            name,
                            desc,
                            signature: None,
                            start: labels.at(start_pc)?,
                            end: labels.at(start_pc + length)?,
                            index,
                        });
                    }
                }
                "StackMapTable" => {
                    frames = self.stack_map_table(method, attr.data, &mut labels)?;
                }
                other => debug!(
                    "dropping code attribute {} of {}.{}",
                    other, self.class_name, method.name
                ),
            }
        }

        let mut insns = Vec::with_capacity(decoded.len() * 2);
        let mut frames = frames.into_iter().peekable();
        for (offset, insn) in decoded {
            if let Some(label) = labels.get(offset) {
                insns.push(Insn::Label(label));
            }
            while let Some((_, frame)) = frames.next_if(|(at, _)| *at == offset) {
                insns.push(Insn::Frame(frame));
            }
            insns.push(insn);
        }
        if let Some(label) = labels.get(code_len) {
            insns.push(Insn::Label(label));
        }
        method.instructions = InsnList::from(insns);
        Ok(())
    }

    fn stack_map_table(
        &self,
        method: &MethodModel,
        data: &[u8],
        labels: &mut Labels,
    ) -> Result<Vec<(usize, FrameNode)>, DecodeError> {
        let mut r = Reader::new(data);
        let count = r.u2()?;
        let mut locals = self.initial_locals(method);
        let mut frames = Vec::with_capacity(count as usize);
        let mut offset: i64 = -1;
        for _ in 0..count {
            let frame_type = r.u1()?;
            let (delta, stack) = match frame_type {
                0..=63 => (frame_type as i64, Vec::new()),
                64..=127 => ((frame_type - 64) as i64, vec![self.vtype(&mut r, labels)?]),
                247 => {
                    let delta = r.u2()? as i64;
                    (delta, vec![self.vtype(&mut r, labels)?])
                }
                248..=250 => {
                    let delta = r.u2()? as i64;
                    let chop = (251 - frame_type) as usize;
                    locals.truncate(locals.len().saturating_sub(chop));
                    (delta, Vec::new())
                }
                251 => (r.u2()? as i64, Vec::new()),
                252..=254 => {
                    let delta = r.u2()? as i64;
                    for _ in 0..(frame_type - 251) {
                        locals.push(self.vtype(&mut r, labels)?);
                    }
                    (delta, Vec::new())
                }
                255 => {
                    let delta = r.u2()? as i64;
                    let local_count = r.u2()?;
                    locals = (0..local_count)
                        .map(|_| self.vtype(&mut r, labels))
                        .collect::<Result<_, _>>()?;
                    let stack_count = r.u2()?;
                    let stack = (0..stack_count)
                        .map(|_| self.vtype(&mut r, labels))
                        .collect::<Result<_, _>>()?;
                    (delta, stack)
                }
                _ => return Err(DecodeError::InvalidAttribute("StackMapTable".into())),
            };
            offset += delta + 1;
            labels.at(offset)?;
            frames.push((
                offset as usize,
                FrameNode {
                    locals: locals.clone(),
                    stack,
                },
            ));
        }
        Ok(frames)
    }

    fn vtype(
        &self,
        r: &mut Reader<'_>,
        labels: &mut Labels,
    ) -> Result<VerificationType, DecodeError> {
        Ok(match r.u1()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(self.cp.class_name(r.u2()?)?.to_string()),
            8 => VerificationType::Uninitialized(labels.at(r.u2()? as i64)?),
            _ => return Err(DecodeError::InvalidAttribute("StackMapTable".into())),
        })
    }

    /// The implicit first frame derived from the method descriptor.
    fn initial_locals(&self, method: &MethodModel) -> Vec<VerificationType> {
        let mut locals = Vec::new();
        if !method.is_static() {
            locals.push(if method.name == "<init>" {
                VerificationType::UninitializedThis
            } else {
                VerificationType::Object(self.class_name.to_string())
            });
        }
        if let Ok(desc) = descriptor::parse_method(&method.desc) {
            locals.extend(desc.args.iter().map(verification_type_of));
        }
        locals
    }

    fn instruction(
        &self,
        code: &[u8],
        offset: usize,
        labels: &mut Labels,
    ) -> Result<(Insn, usize), DecodeError> {
        let mut r = Reader::new(code);
        r.pos = offset;
        let byte = r.u1()?;
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;
        let base = offset as i64;
        let insn = match byte {
            0x00..=0x0f | 0x2e..=0x35 | 0x4f..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe
            | 0xbf | 0xc2 | 0xc3 => Insn::Op(opcode),
            0x10 => Insn::Int {
                opcode,
                operand: r.i1()? as i32,
            },
            0x11 => Insn::Int {
                opcode,
                operand: r.i2()? as i32,
            },
            0x12 => Insn::Ldc(self.constant(r.u1()? as u16)?),
            0x13 | 0x14 => Insn::Ldc(self.constant(r.u2()?)?),
            0x15..=0x19 | 0x36..=0x3a | 0xa9 => Insn::Var {
                opcode,
                index: r.u1()? as u16,
            },
            0x1a..=0x2d | 0x3b..=0x4e => match opcode.expand_short_var() {
                Some((opcode, index)) => Insn::Var { opcode, index },
                None => {
                    return Err(DecodeError::InvalidOpcode {
                        opcode: byte,
                        offset,
                    })
                }
            },
            0x84 => Insn::Iinc {
                index: r.u1()? as u16,
                delta: r.i1()? as i16,
            },
            0x99..=0xa8 | 0xc6 | 0xc7 => Insn::Jump {
                opcode,
                target: labels.at(base + r.i2()? as i64)?,
            },
            0xc8 | 0xc9 => Insn::Jump {
                opcode: if byte == 0xc8 { Opcode::GOTO } else { Opcode::JSR },
                target: labels.at(base + r.i4()? as i64)?,
            },
            0xaa => {
                r.pos += (4 - (offset + 1) % 4) % 4;
                let default = labels.at(base + r.i4()? as i64)?;
                let low = r.i4()?;
                let high = r.i4()?;
                if high < low {
                    return Err(DecodeError::InvalidAttribute("tableswitch".into()));
                }
                let targets = (low..=high)
                    .map(|_| labels.at(base + r.i4()? as i64))
                    .collect::<Result<_, _>>()?;
                Insn::TableSwitch {
                    low,
                    high,
                    default,
                    targets,
                }
            }
            0xab => {
                r.pos += (4 - (offset + 1) % 4) % 4;
                let default = labels.at(base + r.i4()? as i64)?;
                let count = r.i4()?;
                if count < 0 {
                    return Err(DecodeError::InvalidAttribute("lookupswitch".into()));
                }
                let mut keys = Vec::with_capacity(count as usize);
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    keys.push(r.i4()?);
                    targets.push(labels.at(base + r.i4()? as i64)?);
                }
                Insn::LookupSwitch {
                    default,
                    keys,
                    targets,
                }
            }
            0xb2..=0xb5 => {
                let (owner, name, desc, _) = self.cp.member_ref(r.u2()?)?;
                Insn::field(opcode, owner, name, desc)
            }
            0xb6..=0xb9 => {
                let (owner, name, desc, interface) = self.cp.member_ref(r.u2()?)?;
                if byte == 0xb9 {
                    r.u2()?;
                }
                Insn::Method {
                    opcode,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                    interface,
                }
            }
            0xba => {
                let index = r.u2()?;
                r.u2()?;
                let (bsm, nat) = match self.cp.get(index)? {
                    CpEntry::InvokeDynamic(bsm, nat) => (*bsm, *nat),
                    _ => {
                        return Err(DecodeError::UnexpectedConstant {
                            index,
                            expected: "InvokeDynamic",
                        })
                    }
                };
                let (name, desc) = self.cp.name_and_type(nat)?;
                let (bootstrap, args) = self.cp.bootstrap_method(bsm, self.bootstrap)?;
                Insn::InvokeDynamic {
                    name: name.to_string(),
                    desc: desc.to_string(),
                    bootstrap,
                    args,
                }
            }
            0xbb | 0xbd | 0xc0 | 0xc1 => Insn::Type {
                opcode,
                class: self.cp.class_name(r.u2()?)?.to_string(),
            },
            0xbc => Insn::Int {
                opcode,
                operand: r.u1()? as i32,
            },
            0xc4 => {
                let inner = r.u1()?;
                let inner_op = Opcode::from_byte(inner).ok_or(DecodeError::InvalidOpcode {
                    opcode: inner,
                    offset,
                })?;
                let index = r.u2()?;
                match inner {
                    0x84 => Insn::Iinc {
                        index,
                        delta: r.i2()?,
                    },
                    0x15..=0x19 | 0x36..=0x3a | 0xa9 => Insn::Var {
                        opcode: inner_op,
                        index,
                    },
                    _ => {
                        return Err(DecodeError::InvalidOpcode {
                            opcode: inner,
                            offset,
                        })
                    }
                }
            }
            0xc5 => Insn::MultiANewArray {
                desc: self.cp.class_name(r.u2()?)?.to_string(),
                dims: r.u1()?,
            },
            _ => {
                return Err(DecodeError::InvalidOpcode {
                    opcode: byte,
                    offset,
                })
            }
        };
        Ok((insn, r.pos))
    }
}

/// Verification type of a value of the given field type.
pub(crate) fn verification_type_of(ty: &FieldType) -> VerificationType {
    match ty {
        FieldType::Boolean
        | FieldType::Byte
        | FieldType::Char
        | FieldType::Short
        | FieldType::Int => VerificationType::Integer,
        FieldType::Float => VerificationType::Float,
        FieldType::Long => VerificationType::Long,
        FieldType::Double => VerificationType::Double,
        FieldType::Reference(name) => VerificationType::Object(name.clone()),
    }
}

/// Labels created on demand for code offsets.
#[derive(Debug)]
struct Labels {
    slots: Vec<Option<Label>>,
}

impl Labels {
    fn new(code_len: usize) -> Self {
        Self {
            slots: vec![None; code_len + 1],
        }
    }

    fn at(&mut self, offset: i64) -> Result<Label, DecodeError> {
        let slot = usize::try_from(offset)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
            .ok_or(DecodeError::InvalidCodeOffset(offset))?;
        Ok(*slot.get_or_insert_with(Label::new))
    }

    fn get(&self, offset: usize) -> Option<Label> {
        self.slots.get(offset).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let err = read_class(&[0xde, 0xad, 0xbe, 0xef, 0, 0]).unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic(0xdead_beef)));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let err = read_class(&[0xca, 0xfe, 0xba, 0xbe, 0, 0]).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof(_)));
    }

    #[test]
    fn labels_are_shared_per_offset() {
        let mut labels = Labels::new(4);
        let a = labels.at(2).unwrap();
        assert_eq!(labels.at(2).unwrap(), a);
        assert!(labels.at(5).is_err(), "offset past the end of code");
        assert!(labels.at(-1).is_err());
    }
}
