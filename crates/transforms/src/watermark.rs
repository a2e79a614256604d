//! Watermarks: transformers that embed identifying text in the output.
use crate::context::{ClassContext, JobContext};
use crate::entries::OutputArchive;
use crate::{util, Category, ObfuscationOptions, Transform};
use jarcloak_core::encoder::{self, WriteMode};
use jarcloak_core::{access, ClassModel, ClassVersion, Constant, FieldModel, Insn, MethodModel, Opcode, OBJECT};
use jarcloak_utils::errors::TransformError;
use rand::Rng;
use tracing::{debug, warn};

/// Java 5, the version used for synthetic entries that need no stack map frames.
pub(crate) const V1_5: ClassVersion = ClassVersion {
    major: 49,
    minor: 0,
};

/// Name of the field added by [`TextInsideClass`].
const TEXT_FIELD: &str = "\u{13EA}";

/// Serializes a code-less class created by a transformer. Failures are logged and dropped.
pub(crate) fn encode_injected(transformer: &str, class: &ClassModel) -> Option<Vec<u8>> {
    let mut resolver = |_: &str, _: &str| OBJECT.to_string();
    match encoder::write_class(class, WriteMode::ComputeMaxs, &mut resolver) {
        Ok(bytes) => Some(bytes),
        Err(error) => {
            warn!("{transformer}: could not write injected class: {error}");
            None
        }
    }
}

/// Keeps `[a-zA-Z0-9/_-]` and replaces everything else with `_`.
fn sanitize_class_name(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Adds a decoy class named after the watermark text.
#[derive(Debug, Default)]
pub struct DummyClass;

impl DummyClass {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for DummyClass {
    fn name(&self) -> &'static str {
        "DummyClass"
    }

    fn category(&self) -> Category {
        Category::Watermark
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.watermark.dummy_class
    }

    fn transform_output(&self, output: &mut OutputArchive, cx: &JobContext<'_>) {
        let name = sanitize_class_name(&cx.config.options.watermark.dummy_class_text);
        if name.is_empty() {
            debug!("{}: empty watermark text", self.name());
            return;
        }
        let mut rng = cx.rng(self.name(), &name);
        let mut class = ClassModel::new(&name, Some(OBJECT));
        class.version = V1_5;
        class.access = access::PUBLIC;
        // random flags and a descriptor naming an unloadable package
        class.methods.push(MethodModel::new(
            rng.random_range(0..100),
            "\u{1}",
            "(\u{1}/)L\u{1}/;",
        ));
        if let Some(bytes) = encode_injected(self.name(), &class) {
            if !output.inject(format!("{name}.class"), bytes) {
                warn!("{}: {name} already exists in the archive", self.name());
            }
        }
    }
}

/// Adds a static string field holding the watermark text to every class.
#[derive(Debug, Default)]
pub struct TextInsideClass;

impl TextInsideClass {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for TextInsideClass {
    fn name(&self) -> &'static str {
        "TextInsideClass"
    }

    fn category(&self) -> Category {
        Category::Watermark
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.watermark.text_inside_class
    }

    fn transform_class(&self, class: &mut ClassModel, cx: &mut ClassContext<'_>) {
        if class.field(TEXT_FIELD).is_some() {
            return;
        }
        // interface fields have to be public
        let visibility = if class.is_interface() {
            access::PUBLIC
        } else {
            access::PRIVATE
        };
        let mut field = FieldModel::new(
            visibility | access::STATIC | access::FINAL,
            TEXT_FIELD,
            "Ljava/lang/String;",
        );
        let text = &cx.job.config.options.watermark.text_inside_class_text;
        field.value = Some(Constant::String(text.clone()));
        class.fields.push(field);
    }
}

/// Inserts `ldc text; pop` at the start of every eligible method.
#[derive(Debug, Default)]
pub struct UnusedString;

impl UnusedString {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for UnusedString {
    fn name(&self) -> &'static str {
        "UnusedString"
    }

    fn category(&self) -> Category {
        Category::Watermark
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.watermark.unused_string
    }

    fn transform_method(
        &self,
        class: &ClassModel,
        method: &mut MethodModel,
        cx: &mut ClassContext<'_>,
    ) -> Result<(), TransformError> {
        if !util::is_method_eligible(class, method) {
            return Ok(());
        }
        let text = cx.job.config.options.watermark.unused_string_text.clone();
        method
            .instructions
            .prepend([Insn::Ldc(Constant::String(text)), Insn::op(Opcode::POP)]);
        Ok(())
    }
}

/// Sets the archive comment.
#[derive(Debug, Default)]
pub struct ZipComment;

impl ZipComment {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for ZipComment {
    fn name(&self) -> &'static str {
        "ZipComment"
    }

    fn category(&self) -> Category {
        Category::Watermark
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.watermark.zip_comment
    }

    fn transform_output(&self, output: &mut OutputArchive, cx: &JobContext<'_>) {
        output.comment = Some(cx.config.options.watermark.zip_comment_text.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renamer::test_support::{concrete, Fixture};
    use jarcloak_core::decoder;

    #[test]
    fn dummy_class_is_named_after_sanitized_text() {
        assert_eq!(sanitize_class_name("made with: jarcloak!"), "made_with__jarcloak_");
        let mut fixture = Fixture::new(&[], "");
        fixture.config.options.watermark.dummy_class_text = "obf/by me".into();
        let job = fixture.job();
        let mut output = OutputArchive::new();
        DummyClass::new().transform_output(&mut output, &job);
        assert_eq!(output.injected(), ["obf/by_me.class".to_string()]);
        let bytes = output.get("obf/by_me.class").unwrap();
        let class = decoder::read_class(bytes).expect("decoy parses");
        assert_eq!(class.name, "obf/by_me");
        assert_eq!(class.version, V1_5);
        assert_eq!(class.methods[0].name, "\u{1}");
    }

    #[test]
    fn text_field_is_added_once_with_interface_visibility() {
        let fixture = Fixture::new(&[], "");
        let job = fixture.job();
        let transform = TextInsideClass::new();
        let mut class = ClassModel::new("a/I", Some(OBJECT));
        class.access |= access::INTERFACE | access::ABSTRACT;
        let mut cx = ClassContext::new(&job, transform.name(), "a/I");
        transform.transform_class(&mut class, &mut cx);
        transform.transform_class(&mut class, &mut cx);
        assert_eq!(class.fields.len(), 1);
        let field = &class.fields[0];
        assert_eq!(field.access, access::PUBLIC | access::STATIC | access::FINAL);
        assert_eq!(
            field.value,
            Some(Constant::String("Obfuscated with jarcloak".into()))
        );
    }

    #[test]
    fn unused_string_is_prepended_to_concrete_methods() {
        let fixture = Fixture::new(&[], "");
        let job = fixture.job();
        let class = ClassModel::new("a/A", Some(OBJECT));
        let mut cx = ClassContext::new(&job, "UnusedString", "a/A");
        let mut method = concrete(access::PUBLIC, "run", "()V");
        UnusedString::new()
            .transform_method(&class, &mut method, &mut cx)
            .unwrap();
        let code = method.instructions.as_slice();
        assert_eq!(code.len(), 3);
        assert_eq!(code[1], Insn::op(Opcode::POP));

        let mut native = MethodModel::new(access::PUBLIC | access::NATIVE, "n", "()V");
        UnusedString::new()
            .transform_method(&class, &mut native, &mut cx)
            .unwrap();
        assert!(native.instructions.is_empty(), "no code, nothing to prepend to");
    }

    #[test]
    fn zip_comment_is_set() {
        let mut fixture = Fixture::new(&[], "");
        fixture.config.options.watermark.zip_comment_text = "hello".into();
        let job = fixture.job();
        let mut output = OutputArchive::new();
        ZipComment::new().transform_output(&mut output, &job);
        assert_eq!(output.comment.as_deref(), Some("hello"));
    }
}
