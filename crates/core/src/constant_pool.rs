//! Constant pool entries, a read-side view and a deduplicating builder.
use crate::insn::{Constant, ConstantDynamic, Handle};
use jarcloak_utils::errors::{DecodeError, EncodeError};
use indexmap::IndexSet;
use std::collections::HashMap;

/// Constant pool tags.
pub mod tag {
    #![allow(missing_docs)]
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// A raw constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CpEntry {
    /// Index 0 and the second slot of long/double entries.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
}

/// Decodes a modified UTF-8 byte sequence (JVMS 4.4.7).
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let a = bytes[i] as u16;
        if a & 0x80 == 0 {
            if a == 0 {
                return Err(DecodeError::InvalidUtf8);
            }
            units.push(a);
            i += 1;
        } else if a & 0xe0 == 0xc0 {
            let b = *bytes.get(i + 1).ok_or(DecodeError::InvalidUtf8)? as u16;
            units.push(((a & 0x1f) << 6) | (b & 0x3f));
            i += 2;
        } else if a & 0xf0 == 0xe0 {
            let b = *bytes.get(i + 1).ok_or(DecodeError::InvalidUtf8)? as u16;
            let c = *bytes.get(i + 2).ok_or(DecodeError::InvalidUtf8)? as u16;
            units.push(((a & 0x0f) << 12) | ((b & 0x3f) << 6) | (c & 0x3f));
            i += 3;
        } else {
            return Err(DecodeError::InvalidUtf8);
        }
    }
    // Lone surrogates cannot be represented in a Rust string.
    String::from_utf16(&units).map_err(|_| DecodeError::InvalidUtf8)
}

/// Encodes a string as modified UTF-8: NUL as two bytes, supplementary characters as
/// surrogate pairs of three bytes each.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) & 0x1f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) & 0x0f) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

/// Read-side view over a parsed constant pool.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<CpEntry>,
}

impl ConstantPool {
    pub const fn new(entries: Vec<CpEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&CpEntry, DecodeError> {
        match self.entries.get(index as usize) {
            Some(CpEntry::Unusable) | None => Err(DecodeError::InvalidConstantIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str, DecodeError> {
        match self.get(index)? {
            CpEntry::Utf8(value) => Ok(value),
            _ => Err(DecodeError::UnexpectedConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Like [`ConstantPool::utf8`] but index 0 means "absent".
    pub fn optional_utf8(&self, index: u16) -> Result<Option<String>, DecodeError> {
        if index == 0 {
            return Ok(None);
        }
        self.utf8(index).map(|s| Some(s.to_string()))
    }

    pub fn class_name(&self, index: u16) -> Result<&str, DecodeError> {
        match self.get(index)? {
            CpEntry::Class(name) => self.utf8(*name),
            _ => Err(DecodeError::UnexpectedConstant {
                index,
                expected: "Class",
            }),
        }
    }

    /// Like [`ConstantPool::class_name`] but index 0 means "absent".
    pub fn optional_class(&self, index: u16) -> Result<Option<String>, DecodeError> {
        if index == 0 {
            return Ok(None);
        }
        self.class_name(index).map(|s| Some(s.to_string()))
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), DecodeError> {
        match self.get(index)? {
            CpEntry::NameAndType(name, desc) => Ok((self.utf8(*name)?, self.utf8(*desc)?)),
            _ => Err(DecodeError::UnexpectedConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolves a field or method reference into `(owner, name, desc, interface)`.
    pub fn member_ref(&self, index: u16) -> Result<(&str, &str, &str, bool), DecodeError> {
        let (class, nat, interface) = match self.get(index)? {
            CpEntry::FieldRef(c, n) | CpEntry::MethodRef(c, n) => (*c, *n, false),
            CpEntry::InterfaceMethodRef(c, n) => (*c, *n, true),
            _ => {
                return Err(DecodeError::UnexpectedConstant {
                    index,
                    expected: "member reference",
                })
            }
        };
        let (name, desc) = self.name_and_type(nat)?;
        Ok((self.class_name(class)?, name, desc, interface))
    }

    pub fn handle(&self, index: u16) -> Result<Handle, DecodeError> {
        match self.get(index)? {
            CpEntry::MethodHandle(kind, reference) => {
                let (owner, name, desc, interface) = self.member_ref(*reference)?;
                Ok(Handle {
                    kind: *kind,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                    interface,
                })
            }
            _ => Err(DecodeError::UnexpectedConstant {
                index,
                expected: "MethodHandle",
            }),
        }
    }

    /// Resolves any loadable constant. `bootstrap` is the raw `BootstrapMethods` table
    /// (handle index, argument indices) used by dynamic constants.
    pub fn constant(
        &self,
        index: u16,
        bootstrap: &[(u16, Vec<u16>)],
    ) -> Result<Constant, DecodeError> {
        self.constant_at_depth(index, bootstrap, 0)
    }

    /// Resolves entry `bsm` of the bootstrap method table.
    pub fn bootstrap_method(
        &self,
        bsm: u16,
        bootstrap: &[(u16, Vec<u16>)],
    ) -> Result<(Handle, Vec<Constant>), DecodeError> {
        self.bootstrap_at_depth(bsm, bootstrap, 0)
    }

    fn bootstrap_at_depth(
        &self,
        bsm: u16,
        bootstrap: &[(u16, Vec<u16>)],
        depth: usize,
    ) -> Result<(Handle, Vec<Constant>), DecodeError> {
        let (handle, args) = bootstrap
            .get(bsm as usize)
            .ok_or_else(|| DecodeError::InvalidAttribute("BootstrapMethods".into()))?;
        let args = args
            .iter()
            .map(|arg| self.constant_at_depth(*arg, bootstrap, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((self.handle(*handle)?, args))
    }

    fn constant_at_depth(
        &self,
        index: u16,
        bootstrap: &[(u16, Vec<u16>)],
        depth: usize,
    ) -> Result<Constant, DecodeError> {
        // Dynamic constants may nest, but a cycle is malformed.
        if depth > 32 {
            return Err(DecodeError::InvalidAttribute("BootstrapMethods".into()));
        }
        Ok(match self.get(index)? {
            CpEntry::Integer(v) => Constant::Int(*v),
            CpEntry::Float(v) => Constant::Float(*v),
            CpEntry::Long(v) => Constant::Long(*v),
            CpEntry::Double(v) => Constant::Double(*v),
            CpEntry::String(s) => Constant::String(self.utf8(*s)?.to_string()),
            CpEntry::Class(name) => Constant::Class(self.utf8(*name)?.to_string()),
            CpEntry::MethodType(desc) => Constant::MethodType(self.utf8(*desc)?.to_string()),
            CpEntry::MethodHandle(..) => Constant::MethodHandle(self.handle(index)?),
            CpEntry::Dynamic(bsm, nat) => {
                let (name, desc) = self.name_and_type(*nat)?;
                let (handle, args) = self.bootstrap_at_depth(*bsm, bootstrap, depth + 1)?;
                Constant::Dynamic(Box::new(ConstantDynamic {
                    name: name.to_string(),
                    desc: desc.to_string(),
                    bootstrap: handle,
                    args,
                }))
            }
            _ => {
                return Err(DecodeError::UnexpectedConstant {
                    index,
                    expected: "loadable constant",
                })
            }
        })
    }
}

/// Key used to deduplicate entries in the builder. Floats are keyed by their bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Member(u8, u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u8, u16, u16),
}

/// Builds a constant pool, returning the same index for equal entries.
#[derive(Debug)]
pub struct ConstantPoolBuilder {
    entries: Vec<CpEntry>,
    index: HashMap<Key, u16>,
    /// Bootstrap method handle and argument indices, in table order.
    bootstrap_methods: IndexSet<(u16, Vec<u16>)>,
}

impl Default for ConstantPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPoolBuilder {
    pub fn new() -> Self {
        Self {
            entries: vec![CpEntry::Unusable],
            index: HashMap::new(),
            bootstrap_methods: IndexSet::new(),
        }
    }

    fn intern(&mut self, key: Key, entry: CpEntry) -> Result<u16, EncodeError> {
        if let Some(&index) = self.index.get(&key) {
            return Ok(index);
        }
        let wide = matches!(entry, CpEntry::Long(_) | CpEntry::Double(_));
        let index = self.entries.len();
        let needed = index + usize::from(wide);
        if needed > u16::MAX as usize - 1 {
            return Err(EncodeError::ConstantPoolOverflow(needed));
        }
        self.entries.push(entry);
        if wide {
            self.entries.push(CpEntry::Unusable);
        }
        self.index.insert(key, index as u16);
        Ok(index as u16)
    }

    pub fn utf8(&mut self, value: &str) -> Result<u16, EncodeError> {
        let len = encode_modified_utf8(value).len();
        if len > u16::MAX as usize {
            return Err(EncodeError::StringTooLong(len));
        }
        self.intern(Key::Utf8(value.to_string()), CpEntry::Utf8(value.to_string()))
    }

    pub fn class(&mut self, name: &str) -> Result<u16, EncodeError> {
        let name = self.utf8(name)?;
        self.intern(Key::Class(name), CpEntry::Class(name))
    }

    pub fn string(&mut self, value: &str) -> Result<u16, EncodeError> {
        let value = self.utf8(value)?;
        self.intern(Key::String(value), CpEntry::String(value))
    }

    pub fn integer(&mut self, value: i32) -> Result<u16, EncodeError> {
        self.intern(Key::Integer(value), CpEntry::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> Result<u16, EncodeError> {
        self.intern(Key::Float(value.to_bits()), CpEntry::Float(value))
    }

    pub fn long(&mut self, value: i64) -> Result<u16, EncodeError> {
        self.intern(Key::Long(value), CpEntry::Long(value))
    }

    pub fn double(&mut self, value: f64) -> Result<u16, EncodeError> {
        self.intern(Key::Double(value.to_bits()), CpEntry::Double(value))
    }

    pub fn name_and_type(&mut self, name: &str, desc: &str) -> Result<u16, EncodeError> {
        let name = self.utf8(name)?;
        let desc = self.utf8(desc)?;
        self.intern(Key::NameAndType(name, desc), CpEntry::NameAndType(name, desc))
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> Result<u16, EncodeError> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, desc)?;
        self.intern(
            Key::Member(tag::FIELDREF, class, nat),
            CpEntry::FieldRef(class, nat),
        )
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        interface: bool,
    ) -> Result<u16, EncodeError> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, desc)?;
        if interface {
            self.intern(
                Key::Member(tag::INTERFACE_METHODREF, class, nat),
                CpEntry::InterfaceMethodRef(class, nat),
            )
        } else {
            self.intern(
                Key::Member(tag::METHODREF, class, nat),
                CpEntry::MethodRef(class, nat),
            )
        }
    }

    pub fn method_type(&mut self, desc: &str) -> Result<u16, EncodeError> {
        let desc = self.utf8(desc)?;
        self.intern(Key::MethodType(desc), CpEntry::MethodType(desc))
    }

    pub fn handle(&mut self, handle: &Handle) -> Result<u16, EncodeError> {
        let reference = if handle.is_field() {
            self.field_ref(&handle.owner, &handle.name, &handle.desc)?
        } else {
            self.method_ref(&handle.owner, &handle.name, &handle.desc, handle.interface)?
        };
        self.intern(
            Key::MethodHandle(handle.kind, reference),
            CpEntry::MethodHandle(handle.kind, reference),
        )
    }

    /// Registers a bootstrap method and its arguments, returning its table index.
    pub fn bootstrap_method(
        &mut self,
        handle: &Handle,
        args: &[Constant],
    ) -> Result<u16, EncodeError> {
        let handle = self.handle(handle)?;
        let args = args
            .iter()
            .map(|arg| self.constant(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let (index, _) = self.bootstrap_methods.insert_full((handle, args));
        u16::try_from(index).map_err(|_| EncodeError::TooMany("bootstrap methods"))
    }

    pub fn invoke_dynamic(
        &mut self,
        name: &str,
        desc: &str,
        bootstrap: &Handle,
        args: &[Constant],
    ) -> Result<u16, EncodeError> {
        let bsm = self.bootstrap_method(bootstrap, args)?;
        let nat = self.name_and_type(name, desc)?;
        self.intern(
            Key::Dynamic(tag::INVOKE_DYNAMIC, bsm, nat),
            CpEntry::InvokeDynamic(bsm, nat),
        )
    }

    /// Interns any loadable constant.
    pub fn constant(&mut self, constant: &Constant) -> Result<u16, EncodeError> {
        match constant {
            Constant::Int(v) => self.integer(*v),
            Constant::Float(v) => self.float(*v),
            Constant::Long(v) => self.long(*v),
            Constant::Double(v) => self.double(*v),
            Constant::String(s) => self.string(s),
            Constant::Class(name) => self.class(name),
            Constant::MethodType(desc) => self.method_type(desc),
            Constant::MethodHandle(handle) => self.handle(handle),
            Constant::Dynamic(dynamic) => {
                let bsm = self.bootstrap_method(&dynamic.bootstrap, &dynamic.args)?;
                let nat = self.name_and_type(&dynamic.name, &dynamic.desc)?;
                self.intern(
                    Key::Dynamic(tag::DYNAMIC, bsm, nat),
                    CpEntry::Dynamic(bsm, nat),
                )
            }
        }
    }

    pub fn has_bootstrap_methods(&self) -> bool {
        !self.bootstrap_methods.is_empty()
    }

    /// Serializes the `BootstrapMethods` attribute body.
    pub fn write_bootstrap_methods(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.bootstrap_methods.len() as u16).to_be_bytes());
        for (handle, args) in &self.bootstrap_methods {
            out.extend_from_slice(&handle.to_be_bytes());
            out.extend_from_slice(&(args.len() as u16).to_be_bytes());
            for arg in args {
                out.extend_from_slice(&arg.to_be_bytes());
            }
        }
    }

    /// Number of slots in the pool, including slot 0.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Serializes `constant_pool_count` followed by every entry.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in &self.entries {
            write_entry(out, entry);
        }
    }
}

fn u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_entry(out: &mut Vec<u8>, entry: &CpEntry) {
    match entry {
        CpEntry::Unusable => {}
        CpEntry::Utf8(value) => {
            let bytes = encode_modified_utf8(value);
            out.push(tag::UTF8);
            u2(out, bytes.len() as u16);
            out.extend_from_slice(&bytes);
        }
        CpEntry::Integer(v) => {
            out.push(tag::INTEGER);
            out.extend_from_slice(&v.to_be_bytes());
        }
        CpEntry::Float(v) => {
            out.push(tag::FLOAT);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        CpEntry::Long(v) => {
            out.push(tag::LONG);
            out.extend_from_slice(&v.to_be_bytes());
        }
        CpEntry::Double(v) => {
            out.push(tag::DOUBLE);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        CpEntry::Class(i) => {
            out.push(tag::CLASS);
            u2(out, *i);
        }
        CpEntry::String(i) => {
            out.push(tag::STRING);
            u2(out, *i);
        }
        CpEntry::MethodType(i) => {
            out.push(tag::METHOD_TYPE);
            u2(out, *i);
        }
        CpEntry::Module(i) => {
            out.push(tag::MODULE);
            u2(out, *i);
        }
        CpEntry::Package(i) => {
            out.push(tag::PACKAGE);
            u2(out, *i);
        }
        CpEntry::FieldRef(a, b)
        | CpEntry::MethodRef(a, b)
        | CpEntry::InterfaceMethodRef(a, b)
        | CpEntry::NameAndType(a, b)
        | CpEntry::Dynamic(a, b)
        | CpEntry::InvokeDynamic(a, b) => {
            out.push(match entry {
                CpEntry::FieldRef(..) => tag::FIELDREF,
                CpEntry::MethodRef(..) => tag::METHODREF,
                CpEntry::InterfaceMethodRef(..) => tag::INTERFACE_METHODREF,
                CpEntry::NameAndType(..) => tag::NAME_AND_TYPE,
                CpEntry::Dynamic(..) => tag::DYNAMIC,
                _ => tag::INVOKE_DYNAMIC,
            });
            u2(out, *a);
            u2(out, *b);
        }
        CpEntry::MethodHandle(kind, reference) => {
            out.push(tag::METHOD_HANDLE);
            out.push(*kind);
            u2(out, *reference);
        }
    }
}
