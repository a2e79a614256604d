//! In-memory class model.
//!
//! One [`ClassModel`] holds everything needed to write a loadable class file back out. Names
//! are JVM internal names (`com/example/Foo`), descriptors are raw JVM descriptors.
use crate::descriptor;
use crate::insn::{Constant, Insn, InsnList, Label};
use crate::opcode::Opcode;

/// Class and member access flags.
pub mod access {
    #![allow(missing_docs)]
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const VOLATILE: u16 = 0x0040;
    pub const BRIDGE: u16 = 0x0040;
    pub const TRANSIENT: u16 = 0x0080;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const STRICT: u16 = 0x0800;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;
    pub const MODULE: u16 = 0x8000;
}

/// Root of every class hierarchy.
pub const OBJECT: &str = "java/lang/Object";

/// Class file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClassVersion {
    pub major: u16,
    pub minor: u16,
}

impl ClassVersion {
    /// Java 8.
    pub const V8: Self = Self {
        major: 52,
        minor: 0,
    };

    /// Whether classes of this version must carry stack map frames.
    pub const fn requires_frames(self) -> bool {
        self.major >= 50
    }
}

/// A value inside an annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// A primitive or string constant together with its tag (`B`, `C`, `D`, `F`, `I`, `J`,
    /// `S`, `Z` or `s`).
    Const(u8, Constant),
    Enum { desc: String, name: String },
    /// A class literal as a return descriptor.
    Class(String),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub desc: String,
    pub values: Vec<(String, ElementValue)>,
}

/// One `InnerClasses` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    pub name: String,
    pub outer_name: Option<String>,
    pub inner_name: Option<String>,
    pub access: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclosingMethod {
    pub owner: String,
    pub name: Option<String>,
    pub desc: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldModel {
    pub access: u16,
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    /// `ConstantValue` attribute.
    pub value: Option<Constant>,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub deprecated: bool,
}

impl FieldModel {
    pub fn new(access: u16, name: &str, desc: &str) -> Self {
        Self {
            access,
            name: name.to_string(),
            desc: desc.to_string(),
            signature: None,
            value: None,
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            deprecated: false,
        }
    }

    pub const fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }
}

/// An exception table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlock {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// `None` catches everything (`finally`).
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    pub start: Label,
    pub end: Label,
    pub index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub line: u16,
    pub start: Label,
}

/// One `MethodParameters` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: Option<String>,
    pub access: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodModel {
    pub access: u16,
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    pub exceptions: Vec<String>,
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    pub local_variables: Vec<LocalVariable>,
    pub line_numbers: Vec<LineNumber>,
    pub parameters: Vec<Parameter>,
    /// Hints from the input; the writer recomputes both.
    pub max_stack: u16,
    pub max_locals: u16,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub annotation_default: Option<ElementValue>,
    pub deprecated: bool,
}

/// The code-related parts of a method, used to undo a transform.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeSnapshot {
    instructions: InsnList,
    try_catch_blocks: Vec<TryCatchBlock>,
    local_variables: Vec<LocalVariable>,
    line_numbers: Vec<LineNumber>,
    max_stack: u16,
    max_locals: u16,
}

impl MethodModel {
    pub fn new(access: u16, name: &str, desc: &str) -> Self {
        Self {
            access,
            name: name.to_string(),
            desc: desc.to_string(),
            signature: None,
            exceptions: Vec::new(),
            instructions: InsnList::new(),
            try_catch_blocks: Vec::new(),
            local_variables: Vec::new(),
            line_numbers: Vec::new(),
            parameters: Vec::new(),
            max_stack: 0,
            max_locals: 0,
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            annotation_default: None,
            deprecated: false,
        }
    }

    pub const fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    pub const fn is_abstract(&self) -> bool {
        self.access & access::ABSTRACT != 0
    }

    pub const fn is_native(&self) -> bool {
        self.access & access::NATIVE != 0
    }

    pub const fn is_private(&self) -> bool {
        self.access & access::PRIVATE != 0
    }

    /// Constructors and static initializers.
    pub fn is_initializer(&self) -> bool {
        self.name.starts_with('<')
    }

    /// Whether the method carries a `Code` attribute.
    pub fn has_code(&self) -> bool {
        !self.is_abstract() && !self.is_native() && !self.instructions.is_empty()
    }

    /// Captures the code so a failed transform can be undone.
    pub fn snapshot(&self) -> CodeSnapshot {
        CodeSnapshot {
            instructions: self.instructions.clone(),
            try_catch_blocks: self.try_catch_blocks.clone(),
            local_variables: self.local_variables.clone(),
            line_numbers: self.line_numbers.clone(),
            max_stack: self.max_stack,
            max_locals: self.max_locals,
        }
    }

    /// Restores code captured by [`MethodModel::snapshot`].
    pub fn restore(&mut self, snapshot: CodeSnapshot) {
        self.instructions = snapshot.instructions;
        self.try_catch_blocks = snapshot.try_catch_blocks;
        self.local_variables = snapshot.local_variables;
        self.line_numbers = snapshot.line_numbers;
        self.max_stack = snapshot.max_stack;
        self.max_locals = snapshot.max_locals;
    }

    /// First local slot not used by the arguments or any local variable instruction.
    pub fn next_free_local(&self) -> u16 {
        let args = descriptor::argument_slots(&self.desc).unwrap_or(0)
            + usize::from(!self.is_static());
        let used = self
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
        args.max(used).max(self.max_locals as usize) as u16
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassModel {
    pub version: ClassVersion,
    pub access: u16,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub source_file: Option<String>,
    pub source_debug: Option<String>,
    pub inner_classes: Vec<InnerClass>,
    pub enclosing_method: Option<EnclosingMethod>,
    pub nest_host: Option<String>,
    pub nest_members: Vec<String>,
    pub permitted_subclasses: Vec<String>,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub deprecated: bool,
    pub fields: Vec<FieldModel>,
    pub methods: Vec<MethodModel>,
}

impl ClassModel {
    /// A public class of the given name extending `super_name`.
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        Self {
            version: ClassVersion::V8,
            access: access::PUBLIC | access::SUPER,
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            signature: None,
            source_file: None,
            source_debug: None,
            inner_classes: Vec::new(),
            enclosing_method: None,
            nest_host: None,
            nest_members: Vec::new(),
            permitted_subclasses: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            deprecated: false,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub const fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    pub const fn is_annotation(&self) -> bool {
        self.access & access::ANNOTATION != 0
    }

    pub fn method(&self, name: &str, desc: &str) -> Option<&MethodModel> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.desc == desc)
    }

    pub fn method_mut(&mut self, name: &str, desc: &str) -> Option<&mut MethodModel> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.desc == desc)
    }

    pub fn field(&self, name: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether this is the `module-info` descriptor rather than a real class.
    pub fn is_module_info(&self) -> bool {
        self.name == "module-info" || self.access & access::MODULE != 0
    }

    /// Returns the static initializer, creating an empty one when the class has none.
    pub fn find_or_create_clinit(&mut self) -> &mut MethodModel {
        let position = self.methods.iter().position(|m| m.name == "<clinit>");
        let index = match position {
            Some(index) => index,
            None => {
                let mut clinit = MethodModel::new(access::STATIC, "<clinit>", "()V");
                clinit.instructions.push(Insn::Op(Opcode::RETURN));
                self.methods.push(clinit);
                self.methods.len() - 1
            }
        };
        &mut self.methods[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_restores_code() {
        let mut method = MethodModel::new(access::PUBLIC, "run", "()V");
        method.instructions.push(Insn::Op(Opcode::RETURN));
        let snapshot = method.snapshot();
        method.instructions.prepend([Insn::Op(Opcode::NOP)]);
        method.max_locals = 9;
        method.restore(snapshot);
        assert_eq!(method.instructions.len(), 1);
        assert_eq!(method.max_locals, 0);
    }

    #[test]
    fn next_free_local_accounts_for_wide_values() {
        let mut method = MethodModel::new(access::STATIC, "calc", "(JI)V");
        assert_eq!(method.next_free_local(), 3, "long takes two slots plus one int");
        method.instructions.push(Insn::Var {
            opcode: Opcode::DSTORE,
            index: 5,
        });
        assert_eq!(method.next_free_local(), 7);
    }

    #[test]
    fn clinit_is_created_once() {
        let mut class = ClassModel::new("a/B", Some(OBJECT));
        class.find_or_create_clinit();
        class.find_or_create_clinit();
        assert_eq!(class.methods.len(), 1);
        assert!(class.method("<clinit>", "()V").is_some());
    }
}
