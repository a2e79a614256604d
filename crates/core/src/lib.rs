//! Class file model, reader and writer for the jarcloak obfuscator.
//!
//! [`decoder::read_class`] turns class file bytes into a [`ClassModel`] whose code is a
//! label-based [`InsnList`]; [`encoder::write_class`] serializes it back, recomputing stack map
//! frames and operand stack sizes. [`HierarchyIndex`] and [`ClassPath`] answer the type
//! questions renaming and frame computation need.
pub mod classpath;
pub mod constant_pool;
pub mod decoder;
pub mod descriptor;
pub mod encoder;
pub mod frames;
pub mod hierarchy;
pub mod insn;
pub mod model;
pub mod opcode;

pub use classpath::{ClassHeader, ClassPath};
pub use encoder::WriteMode;
pub use frames::SuperclassResolver;
pub use hierarchy::{HierarchyIndex, Lookup};
pub use insn::{Constant, Insn, InsnList, Label, MAX_CODE_SIZE};
pub use model::{access, ClassModel, ClassVersion, FieldModel, MethodModel, OBJECT};
pub use opcode::Opcode;
