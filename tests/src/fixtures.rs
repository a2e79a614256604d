//! Builders for small class files and helpers to run whole jobs over them.
use jarcloak_core::encoder::{self, WriteMode};
use jarcloak_core::{access, decoder, ClassModel, FieldModel, Insn, MethodModel, Opcode, OBJECT};
use jarcloak_transform::entries::InputEntry;
use jarcloak_transform::{ObfuscationConfig, ObfuscationResult, Obfuscator};

pub const STRING: &str = "Ljava/lang/String;";

/// `aload_0`.
pub fn this() -> Insn {
    Insn::Var {
        opcode: Opcode::ALOAD,
        index: 0,
    }
}

/// A public class with a no-argument constructor calling its superclass's.
pub fn class(name: &str, super_name: &str) -> ClassModel {
    let mut class = ClassModel::new(name, Some(super_name));
    let mut init = MethodModel::new(access::PUBLIC, "<init>", "()V");
    init.instructions.extend([
        this(),
        Insn::method(Opcode::INVOKESPECIAL, super_name, "<init>", "()V"),
        Insn::op(Opcode::RETURN),
    ]);
    class.methods.push(init);
    class
}

/// A public interface.
pub fn interface(name: &str) -> ClassModel {
    let mut class = ClassModel::new(name, Some(OBJECT));
    class.access = access::PUBLIC | access::INTERFACE | access::ABSTRACT;
    class
}

/// A method of descriptor `desc` whose body is `code`. `code` must end with a return.
pub fn method<I>(flags: u16, name: &str, desc: &str, code: I) -> MethodModel
where
    I: IntoIterator<Item = Insn>,
{
    let mut method = MethodModel::new(flags, name, desc);
    method.instructions.extend(code);
    method
}

/// A public `()V` method that only returns.
pub fn empty(name: &str) -> MethodModel {
    method(access::PUBLIC, name, "()V", [Insn::op(Opcode::RETURN)])
}

pub fn abstract_method(name: &str, desc: &str) -> MethodModel {
    MethodModel::new(access::PUBLIC | access::ABSTRACT, name, desc)
}

pub fn field(flags: u16, name: &str, desc: &str) -> FieldModel {
    FieldModel::new(flags, name, desc)
}

/// Serializes `class` with computed frames, assuming every type extends `java/lang/Object`.
pub fn encode(class: &ClassModel) -> Vec<u8> {
    let mut resolver = |_: &str, _: &str| OBJECT.to_string();
    encoder::write_class(class, WriteMode::ComputeFrames, &mut resolver)
        .unwrap_or_else(|e| panic!("{} does not encode: {e}", class.name))
}

/// One `.class` entry per class, in order.
pub fn entries(classes: &[ClassModel]) -> Vec<InputEntry> {
    classes
        .iter()
        .map(|class| InputEntry::new(format!("{}.class", class.name), encode(class)))
        .collect()
}

/// A reproducible configuration with every transformer off.
pub fn config() -> ObfuscationConfig {
    ObfuscationConfig {
        seed: Some(42),
        parallel: false,
        ..ObfuscationConfig::default()
    }
}

/// Runs one job over `entries`.
pub fn run_entries(entries: Vec<InputEntry>, config: ObfuscationConfig) -> ObfuscationResult {
    Obfuscator::new(config)
        .expect("valid configuration")
        .run(entries)
        .expect("job completes")
}

/// Runs one job over `classes`.
pub fn run(classes: &[ClassModel], config: ObfuscationConfig) -> ObfuscationResult {
    run_entries(entries(classes), config)
}

/// Every class of the output archive, parsed back, in archive order.
pub fn output_classes(result: &ObfuscationResult) -> Vec<ClassModel> {
    result
        .archive
        .iter()
        .filter(|(name, _)| name.ends_with(".class"))
        .map(|(name, bytes)| {
            decoder::read_class(bytes).unwrap_or_else(|e| panic!("{name} does not parse: {e}"))
        })
        .collect()
}

/// The class of the given name.
pub fn find<'a>(classes: &'a [ClassModel], name: &str) -> &'a ClassModel {
    classes
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("{name} missing from {:?}", names(classes)))
}

pub fn names(classes: &[ClassModel]) -> Vec<&str> {
    classes.iter().map(|c| c.name.as_str()).collect()
}

/// The `name` of every method instruction of `method` that calls `desc`.
pub fn called_names<'a>(method: &'a MethodModel, desc: &str) -> Vec<&'a str> {
    method
        .instructions
        .iter()
        .filter_map(|insn| match insn {
            Insn::Method { name, desc: d, .. } if d == desc => Some(name.as_str()),
            _ => None,
        })
        .collect()
}
