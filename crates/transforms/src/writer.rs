//! Class serialization with fallbacks.
//!
//! A class is first written with freshly computed stack map frames. If that fails it is written
//! again keeping its decoded frames and recomputing only max stack/locals, and if that fails
//! too it is dropped from the output. Frame computation asks a [`FallbackResolver`] for common
//! superclasses, which never fails: unknown types are assumed to extend `java/lang/Object`.
use crate::guard::{Degradation, DegradationKind};
use jarcloak_core::classpath::common_super_class;
use jarcloak_core::encoder::{self, WriteMode};
use jarcloak_core::{ClassHeader, ClassModel, ClassPath, SuperclassResolver, OBJECT};
use jarcloak_utils::errors::{ResolutionError, WriteError};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Phase name used in degradation records.
const WRITER: &str = "Writer";

fn header_of(class: &ClassModel) -> ClassHeader {
    ClassHeader {
        name: class.name.clone(),
        super_name: class.super_name.clone(),
        interfaces: class.interfaces.clone(),
        access: class.access,
    }
}

/// Class headers keyed by internal name; the first class of a name wins.
#[derive(Debug, Clone, Default)]
pub struct ClassHeaders(HashMap<String, ClassHeader>);

impl ClassHeaders {
    pub fn build<'a, I>(classes: I) -> Self
    where
        I: IntoIterator<Item = &'a ClassModel>,
    {
        let mut map = HashMap::new();
        for class in classes {
            map.entry(class.name.clone())
                .or_insert_with(|| header_of(class));
        }
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&ClassHeader> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Resolves class headers for frame computation from the classes of the output, then the
/// library class path. Frames are computed after the global remap, so every name reaching the
/// resolver is already final and output headers carry the renamed supertypes.
///
/// Whatever is still unknown resolves to `java/lang/Object`, logged once per type and recorded.
#[derive(Debug)]
pub struct FallbackResolver<'a> {
    output: &'a ClassHeaders,
    library: &'a ClassPath,
    class: &'a str,
    missing: HashSet<String>,
    degradations: Vec<Degradation>,
}

impl<'a> FallbackResolver<'a> {
    pub fn new(output: &'a ClassHeaders, library: &'a ClassPath, class: &'a str) -> Self {
        Self {
            output,
            library,
            class,
            missing: HashSet::new(),
            degradations: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<ClassHeader> {
        self.output
            .get(name)
            .or_else(|| self.library.get(name))
            .cloned()
    }

    /// Records collected while resolving.
    pub fn into_degradations(self) -> Vec<Degradation> {
        self.degradations
    }
}

impl SuperclassResolver for FallbackResolver<'_> {
    fn common_super_class(&mut self, left: &str, right: &str) -> String {
        match common_super_class(left, right, |name| self.lookup(name)) {
            Ok(common) => common,
            Err(ResolutionError::TypeNotFound(name)) => {
                if self.missing.insert(name.clone()) {
                    warn!(
                        "{}: type {name} not found, assuming {OBJECT} as common superclass",
                        self.class
                    );
                    self.degradations.push(Degradation::new(
                        WRITER,
                        self.class,
                        DegradationKind::ResolutionFallback,
                        ResolutionError::TypeNotFound(name).to_string(),
                    ));
                }
                OBJECT.to_string()
            }
        }
    }
}

/// Outcome of writing one class.
#[derive(Debug)]
pub struct WrittenClass {
    pub name: String,
    /// `None` when the class was skipped.
    pub bytes: Option<Vec<u8>>,
    pub degradations: Vec<Degradation>,
}

/// Serializes the classes of one job.
#[derive(Debug)]
pub struct ClassWriter<'a> {
    output: ClassHeaders,
    library: &'a ClassPath,
}

impl<'a> ClassWriter<'a> {
    /// # Arguments
    /// * `output` - The transformed classes about to be written, under their final names.
    /// * `library` - Library headers for types outside the archive.
    pub fn new<'o, O>(output: O, library: &'a ClassPath) -> Self
    where
        O: IntoIterator<Item = &'o ClassModel>,
    {
        Self {
            output: ClassHeaders::build(output),
            library,
        }
    }

    /// Writes `class`, falling back from computed frames to decoded frames to skipping it.
    pub fn write(&self, class: &ClassModel) -> WrittenClass {
        let mut resolver = FallbackResolver::new(&self.output, self.library, &class.name);
        let result = encoder::write_class(class, WriteMode::ComputeFrames, &mut resolver);
        let mut degradations = resolver.into_degradations();

        let bytes = match result {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                warn!("{}: frame computation failed, keeping decoded frames: {error}", class.name);
                degradations.push(Degradation::new(
                    WRITER,
                    &class.name,
                    DegradationKind::FrameFallback,
                    error.to_string(),
                ));
                let mut resolver = |_: &str, _: &str| OBJECT.to_string();
                match encoder::write_class(class, WriteMode::ComputeMaxs, &mut resolver) {
                    Ok(bytes) => Some(bytes),
                    Err(source) => {
                        let error = WriteError::Encode {
                            class: class.name.clone(),
                            source,
                        };
                        warn!("skipping class: {error}");
                        degradations.push(Degradation::new(
                            WRITER,
                            &class.name,
                            DegradationKind::ClassSkipped,
                            error.to_string(),
                        ));
                        None
                    }
                }
            }
        };
        WrittenClass {
            name: class.name.clone(),
            bytes,
            degradations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::{access, Insn, Label, MethodModel, Opcode};

    fn class(name: &str, super_name: &str) -> ClassModel {
        ClassModel::new(name, Some(super_name))
    }

    /// `static Object pick(boolean)` returning a new `left` or a new `right`, which forces a
    /// frame merge of the two types.
    fn picker(left: &str, right: &str) -> ClassModel {
        let (other, join) = (Label::new(), Label::new());
        let mut method = MethodModel::new(access::PUBLIC | access::STATIC, "pick", "(Z)Ljava/lang/Object;");
        let new = |owner: &str| {
            [
                Insn::type_insn(Opcode::NEW, owner),
                Insn::op(Opcode::DUP),
                Insn::method(Opcode::INVOKESPECIAL, owner, "<init>", "()V"),
            ]
        };
        method.instructions.extend([
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: 0,
            },
            Insn::jump(Opcode::IFEQ, other),
        ]);
        method.instructions.extend(new(left));
        method.instructions.extend([Insn::jump(Opcode::GOTO, join), Insn::Label(other)]);
        method.instructions.extend(new(right));
        method.instructions.extend([Insn::Label(join), Insn::op(Opcode::ARETURN)]);
        let mut class = class("p/Picker", OBJECT);
        class.methods.push(method);
        class
    }

    #[test]
    fn renamed_types_resolve_through_the_output_headers() {
        let output = vec![class("AC", OBJECT), class("AA", "AC"), class("AB", "AC")];
        let library = ClassPath::with_jdk();
        let output = ClassHeaders::build(&output);
        let mut resolver = FallbackResolver::new(&output, &library, "p/Picker");
        assert_eq!(resolver.common_super_class("AA", "AB"), "AC");
        assert_eq!(
            resolver.common_super_class("AA", "java/io/BufferedInputStream"),
            OBJECT
        );
        assert!(resolver.into_degradations().is_empty());
    }

    #[test]
    fn output_classes_extending_jdk_streams_meet_at_the_stream_base() {
        let output = vec![class("AA", "java/io/FilterInputStream")];
        let library = ClassPath::with_jdk();
        let output = ClassHeaders::build(&output);
        let mut resolver = FallbackResolver::new(&output, &library, "p/Picker");
        assert_eq!(
            resolver.common_super_class("AA", "java/io/FileInputStream"),
            "java/io/InputStream"
        );
        assert!(resolver.into_degradations().is_empty());
    }

    #[test]
    fn unknown_types_fall_back_to_object_once() {
        let library = ClassPath::with_jdk();
        let output = ClassHeaders::default();
        let mut resolver = FallbackResolver::new(&output, &library, "p/Picker");
        assert_eq!(resolver.common_super_class("x/Gone", "x/Other"), OBJECT);
        assert_eq!(resolver.common_super_class("x/Gone", "x/Third"), OBJECT);
        let degradations = resolver.into_degradations();
        assert_eq!(degradations.len(), 1, "one record per missing type");
        assert_eq!(degradations[0].kind, DegradationKind::ResolutionFallback);
        assert!(degradations[0].reason.contains("x/Gone"));
    }

    #[test]
    fn missing_library_types_still_produce_output() {
        let picker = picker("lib/Left", "lib/Right");
        let library = ClassPath::with_jdk();
        let writer = ClassWriter::new([&picker], &library);
        let written = writer.write(&picker);
        assert!(written.bytes.is_some(), "class is written despite the missing types");
        assert!(written
            .degradations
            .iter()
            .any(|d| d.kind == DegradationKind::ResolutionFallback && d.target == "p/Picker"));
    }

    #[test]
    fn unwritable_classes_are_skipped() {
        let mut broken = class("p/Broken", OBJECT);
        let mut method = MethodModel::new(access::PUBLIC | access::STATIC, "f", "()V");
        method.instructions.push(Insn::jump(Opcode::GOTO, Label::new()));
        broken.methods.push(method);
        let library = ClassPath::with_jdk();
        let writer = ClassWriter::new([&broken], &library);
        let written = writer.write(&broken);
        assert!(written.bytes.is_none());
        let kinds: Vec<_> = written.degradations.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DegradationKind::FrameFallback, DegradationKind::ClassSkipped]
        );
    }
}
