//! Field/method descriptor parsing and class-name rewriting inside descriptors and generic
//! signatures.
use jarcloak_utils::errors::FrameError;

/// A parsed field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    /// Internal name for classes, full descriptor for arrays.
    Reference(String),
}

impl FieldType {
    /// Local variable / operand stack slots taken by a value of this type.
    pub const fn slots(&self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }
}

/// A parsed method descriptor. `ret` is `None` for `void`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub args: Vec<FieldType>,
    pub ret: Option<FieldType>,
}

fn invalid(desc: &str) -> FrameError {
    FrameError::InvalidDescriptor(desc.to_string())
}

/// Parses one field type starting at byte `pos`, returning the type and the position after it.
fn parse_at(desc: &str, pos: usize) -> Result<(FieldType, usize), FrameError> {
    let bytes = desc.as_bytes();
    let tag = *bytes.get(pos).ok_or_else(|| invalid(desc))?;
    let simple = |ty| Ok((ty, pos + 1));
    match tag {
        b'Z' => simple(FieldType::Boolean),
        b'B' => simple(FieldType::Byte),
        b'C' => simple(FieldType::Char),
        b'S' => simple(FieldType::Short),
        b'I' => simple(FieldType::Int),
        b'F' => simple(FieldType::Float),
        b'J' => simple(FieldType::Long),
        b'D' => simple(FieldType::Double),
        b'L' => {
            let end = desc[pos..].find(';').ok_or_else(|| invalid(desc))? + pos;
            if end == pos + 1 {
                return Err(invalid(desc));
            }
            Ok((FieldType::Reference(desc[pos + 1..end].to_string()), end + 1))
        }
        b'[' => {
            let mut end = pos;
            while bytes.get(end) == Some(&b'[') {
                end += 1;
            }
            let (_, after) = parse_at(desc, end)?;
            Ok((FieldType::Reference(desc[pos..after].to_string()), after))
        }
        _ => Err(invalid(desc)),
    }
}

/// Parses a complete field descriptor.
pub fn parse_field(desc: &str) -> Result<FieldType, FrameError> {
    let (ty, end) = parse_at(desc, 0)?;
    if end != desc.len() {
        return Err(invalid(desc));
    }
    Ok(ty)
}

/// Parses a complete method descriptor.
pub fn parse_method(desc: &str) -> Result<MethodDescriptor, FrameError> {
    if !desc.starts_with('(') {
        return Err(invalid(desc));
    }
    let mut pos = 1;
    let mut args = Vec::new();
    while desc.as_bytes().get(pos) != Some(&b')') {
        let (ty, next) = parse_at(desc, pos)?;
        args.push(ty);
        pos = next;
    }
    pos += 1;
    let ret = if &desc[pos..] == "V" {
        None
    } else {
        let (ty, end) = parse_at(desc, pos)?;
        if end != desc.len() {
            return Err(invalid(desc));
        }
        Some(ty)
    };
    Ok(MethodDescriptor { args, ret })
}

/// Slots taken by the arguments of a method descriptor, excluding `this`.
pub fn argument_slots(desc: &str) -> Result<usize, FrameError> {
    Ok(parse_method(desc)?.args.iter().map(FieldType::slots).sum())
}

/// Element type of an array descriptor (`[[I` gives `[I`).
pub fn array_element(desc: &str) -> Option<FieldType> {
    desc.strip_prefix('[').and_then(|rest| parse_field(rest).ok())
}

/// Rewrites every class name embedded in a field or method descriptor.
pub fn remap_descriptor<F>(desc: &str, map: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(desc.len());
    let mut rest = desc;
    while let Some(start) = rest.find('L') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail.find(';') {
            Some(end) => {
                let name = &tail[..end];
                out.push('L');
                out.push_str(&map(name).unwrap_or_else(|| name.to_string()));
                out.push(';');
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Rewrites an internal name or, for arrays, an array descriptor.
pub fn remap_type<F>(name: &str, map: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if name.starts_with('[') {
        remap_descriptor(name, map)
    } else {
        map(name).unwrap_or_else(|| name.to_string())
    }
}

/// Rewrites class names inside a generic signature (class, method or field form).
///
/// Returns `None` when the signature is malformed; callers keep the original then.
pub fn remap_signature<F>(signature: &str, map: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut parser = SignatureRemapper {
        src: signature,
        pos: 0,
        out: String::with_capacity(signature.len()),
        map,
    };
    parser.signature()?;
    Some(parser.out)
}

struct SignatureRemapper<'a, F> {
    src: &'a str,
    pos: usize,
    out: String,
    map: &'a F,
}

impl<F> SignatureRemapper<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.out.push(byte as char);
        self.pos += 1;
        Some(byte)
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        (self.bump()? == byte).then_some(())
    }

    /// Reads an identifier up to (not including) one of the signature delimiters.
    fn identifier(&mut self) -> Option<&str> {
        let start = self.pos;
        let len = self.src[start..].find(['.', ';', '[', '/', '<', '>', ':'])?;
        self.pos += len;
        Some(&self.src[start..start + len])
    }

    fn signature(&mut self) -> Option<()> {
        if self.peek() == Some(b'<') {
            self.type_parameters()?;
        }
        if self.peek() == Some(b'(') {
            self.bump();
            while self.peek()? != b')' {
                self.java_type()?;
            }
            self.bump();
            if self.peek() == Some(b'V') {
                self.bump();
            } else {
                self.java_type()?;
            }
            while self.peek() == Some(b'^') {
                self.bump();
                self.reference_type()?;
            }
        } else {
            while self.pos < self.src.len() {
                self.reference_type()?;
            }
        }
        (self.pos == self.src.len()).then_some(())
    }

    fn type_parameters(&mut self) -> Option<()> {
        self.expect(b'<')?;
        while self.peek()? != b'>' {
            let name = self.identifier()?.to_string();
            self.out.push_str(&name);
            self.expect(b':')?;
            if !matches!(self.peek()?, b':' | b'>') {
                self.reference_type()?;
            }
            while self.peek()? == b':' {
                self.bump();
                self.reference_type()?;
            }
        }
        self.expect(b'>')
    }

    fn java_type(&mut self) -> Option<()> {
        match self.peek()? {
            b'Z' | b'B' | b'C' | b'S' | b'I' | b'F' | b'J' | b'D' => {
                self.bump();
                Some(())
            }
            _ => self.reference_type(),
        }
    }

    fn reference_type(&mut self) -> Option<()> {
        match self.peek()? {
            b'L' => self.class_type(),
            b'T' => {
                self.bump();
                let name = self.identifier()?.to_string();
                self.out.push_str(&name);
                self.expect(b';')
            }
            b'[' => {
                self.bump();
                self.java_type()
            }
            _ => None,
        }
    }

    fn class_type(&mut self) -> Option<()> {
        self.expect(b'L')?;
        let start = self.pos;
        let len = self.src[start..].find(['.', ';', '<'])?;
        self.pos += len;
        let original = self.src[start..start + len].to_string();
        let mapped = (self.map)(&original).unwrap_or_else(|| original.clone());
        self.out.push_str(&mapped);
        let mut outer = original;
        loop {
            if self.peek()? == b'<' {
                self.type_arguments()?;
            }
            match self.peek()? {
                b';' => {
                    self.bump();
                    return Some(());
                }
                b'.' => {
                    self.bump();
                    let inner = self.identifier()?.to_string();
                    let full = format!("{outer}${inner}");
                    let simple = match (self.map)(&full) {
                        Some(renamed) => renamed
                            .rsplit(['$', '/'])
                            .next()
                            .unwrap_or(&renamed)
                            .to_string(),
                        None => inner,
                    };
                    self.out.push_str(&simple);
                    outer = full;
                }
                _ => return None,
            }
        }
    }

    fn type_arguments(&mut self) -> Option<()> {
        self.expect(b'<')?;
        while self.peek()? != b'>' {
            match self.peek()? {
                b'*' => {
                    self.bump();
                }
                b'+' | b'-' => {
                    self.bump();
                    self.reference_type()?;
                }
                _ => self.reference_type()?,
            }
        }
        self.expect(b'>')
    }
}
