//! Debug attribute stripping and scrambling.
use crate::config::{LineNumberOption, LocalVariableOption};
use crate::context::ClassContext;
use crate::{Category, ObfuscationOptions, Transform};
use jarcloak_core::{ClassModel, MethodModel};
use jarcloak_utils::errors::TransformError;
use rand::Rng;

/// Name given to every local by [`LocalVariableTransformer`] in `obfuscate` mode.
const LOCAL_GLYPH: &str = "\u{6000}";

/// Deletes or scrambles local variable tables.
#[derive(Debug, Default)]
pub struct LocalVariableTransformer;

impl LocalVariableTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for LocalVariableTransformer {
    fn name(&self) -> &'static str {
        "LocalVariable"
    }

    fn category(&self) -> Category {
        Category::Stable
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.local_variables != LocalVariableOption::Keep
    }

    fn transform_method(
        &self,
        _class: &ClassModel,
        method: &mut MethodModel,
        cx: &mut ClassContext<'_>,
    ) -> Result<(), TransformError> {
        match cx.job.config.options.local_variables {
            LocalVariableOption::Keep => {}
            LocalVariableOption::Delete => {
                method.local_variables.clear();
                method.parameters.clear();
            }
            LocalVariableOption::Obfuscate => {
                // a descriptor naming a class that does not exist; debuggers cannot resolve it
                let bogus = format!("L{LOCAL_GLYPH};");
                for local in &mut method.local_variables {
                    local.name = LOCAL_GLYPH.to_string();
                    local.desc.clone_from(&bogus);
                    local.signature = None;
                }
                for parameter in &mut method.parameters {
                    parameter.name = Some(LOCAL_GLYPH.to_string());
                }
            }
        }
        Ok(())
    }
}

/// Deletes or randomizes line number tables.
#[derive(Debug, Default)]
pub struct LineNumberTransformer;

impl LineNumberTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for LineNumberTransformer {
    fn name(&self) -> &'static str {
        "LineNumber"
    }

    fn category(&self) -> Category {
        Category::Stable
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.line_numbers != LineNumberOption::Keep
    }

    fn transform_method(
        &self,
        _class: &ClassModel,
        method: &mut MethodModel,
        cx: &mut ClassContext<'_>,
    ) -> Result<(), TransformError> {
        match cx.job.config.options.line_numbers {
            LineNumberOption::Keep => {}
            LineNumberOption::Delete => method.line_numbers.clear(),
            LineNumberOption::Randomize => {
                for entry in &mut method.line_numbers {
                    entry.line = cx.rng.random_range(0..u16::MAX);
                }
            }
        }
        Ok(())
    }
}

/// Removes `SourceFile` and `SourceDebugExtension`.
#[derive(Debug, Default)]
pub struct SourceFileTransformer;

impl SourceFileTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for SourceFileTransformer {
    fn name(&self) -> &'static str {
        "SourceFile"
    }

    fn category(&self) -> Category {
        Category::Stable
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.remove_source_file
    }

    fn transform_class(&self, class: &mut ClassModel, _cx: &mut ClassContext<'_>) {
        class.source_file = None;
        class.source_debug = None;
    }
}

/// Removes the `InnerClasses` attribute.
#[derive(Debug, Default)]
pub struct InnerClassTransformer;

impl InnerClassTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for InnerClassTransformer {
    fn name(&self) -> &'static str {
        "InnerClass"
    }

    fn category(&self) -> Category {
        Category::Stable
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.remove_inner_classes
    }

    fn transform_class(&self, class: &mut ClassModel, _cx: &mut ClassContext<'_>) {
        class.inner_classes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renamer::test_support::Fixture;
    use jarcloak_core::model::{InnerClass, LineNumber, LocalVariable, Parameter};
    use jarcloak_core::{access, Insn, Label, Opcode, OBJECT};

    fn debug_method() -> MethodModel {
        let (start, end) = (Label::new(), Label::new());
        let mut method = MethodModel::new(access::PUBLIC | access::STATIC, "sum", "(I)I");
        method.instructions.extend([
            Insn::Label(start),
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: 0,
            },
            Insn::op(Opcode::IRETURN),
            Insn::Label(end),
        ]);
        method.local_variables.push(LocalVariable {
            name: "count".into(),
            desc: "I".into(),
            signature: None,
            start,
            end,
            index: 0,
        });
        method.line_numbers = vec![LineNumber { line: 12, start }; 4];
        method.parameters.push(Parameter {
            name: Some("count".into()),
            access: 0,
        });
        method
    }

    fn run(transform: &dyn Transform, fixture: &Fixture, method: &mut MethodModel) {
        let class = ClassModel::new("a/A", Some(OBJECT));
        let job = fixture.job();
        let mut cx = ClassContext::new(&job, transform.name(), "a/A");
        transform.transform_method(&class, method, &mut cx).unwrap();
    }

    #[test]
    fn locals_are_deleted_or_scrambled() {
        let mut fixture = Fixture::new(&[], "");
        fixture.config.options.local_variables = LocalVariableOption::Delete;
        let mut method = debug_method();
        run(&LocalVariableTransformer::new(), &fixture, &mut method);
        assert!(method.local_variables.is_empty());
        assert!(method.parameters.is_empty());

        fixture.config.options.local_variables = LocalVariableOption::Obfuscate;
        let mut method = debug_method();
        run(&LocalVariableTransformer::new(), &fixture, &mut method);
        let local = &method.local_variables[0];
        assert_eq!(local.name, LOCAL_GLYPH);
        assert_eq!(local.desc, "L\u{6000};");
        assert_eq!(local.index, 0, "slot is untouched");
        assert_eq!(method.parameters[0].name.as_deref(), Some(LOCAL_GLYPH));
    }

    #[test]
    fn line_numbers_are_deleted_or_randomized() {
        let mut fixture = Fixture::new(&[], "");
        fixture.config.options.line_numbers = LineNumberOption::Randomize;
        let mut method = debug_method();
        run(&LineNumberTransformer::new(), &fixture, &mut method);
        assert_eq!(method.line_numbers.len(), 4, "entries are kept");
        assert!(method.line_numbers.iter().any(|entry| entry.line != 12));

        fixture.config.options.line_numbers = LineNumberOption::Delete;
        run(&LineNumberTransformer::new(), &fixture, &mut method);
        assert!(method.line_numbers.is_empty());
    }

    #[test]
    fn class_attributes_are_removed() {
        let fixture = Fixture::new(&[], "");
        let job = fixture.job();
        let mut class = ClassModel::new("a/A", Some(OBJECT));
        class.source_file = Some("A.java".into());
        class.source_debug = Some("SMAP".into());
        class.inner_classes.push(InnerClass {
            name: "a/A$B".into(),
            outer_name: Some("a/A".into()),
            inner_name: Some("B".into()),
            access: access::PUBLIC,
        });
        let mut cx = ClassContext::new(&job, "SourceFile", "a/A");
        SourceFileTransformer::new().transform_class(&mut class, &mut cx);
        InnerClassTransformer::new().transform_class(&mut class, &mut cx);
        assert!(class.source_file.is_none() && class.source_debug.is_none());
        assert!(class.inner_classes.is_empty());
    }

    #[test]
    fn keep_options_disable_the_transformers() {
        let options = ObfuscationOptions::default();
        assert!(!LocalVariableTransformer::new().is_enabled(&options));
        assert!(!LineNumberTransformer::new().is_enabled(&options));
        assert!(!SourceFileTransformer::new().is_enabled(&options));
        assert!(!InnerClassTransformer::new().is_enabled(&options));
    }
}
