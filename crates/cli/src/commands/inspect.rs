/// Module for the `inspect` subcommand, which prints a summary of the classes in a class file
/// or jar: members, code sizes and complexity against the default guard limits.
use crate::archive::{self, InputKind};
use async_trait::async_trait;
use clap::Args;
use jarcloak_analysis::metrics::{self, ClassMetrics};
use jarcloak_analysis::ComplexityLimits;
use jarcloak_core::{decoder, ClassModel};
use jarcloak_utils::errors::InputError;
use std::error::Error;
use std::path::PathBuf;
use tracing::warn;

/// Arguments for the `inspect` subcommand.
#[derive(Args)]
pub struct InspectArgs {
    /// A `.class` file or a jar.
    pub input: PathBuf,
    /// Print the metrics as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Parses every class of the input. Jar entries under `META-INF/` are left out, like the
/// obfuscator does.
pub fn read_classes(path: &std::path::Path) -> Result<Vec<ClassModel>, InputError> {
    let entries = match archive::input_kind(path)? {
        InputKind::Class => vec![(path.display().to_string(), std::fs::read(path)?)],
        InputKind::Archive => archive::read_archive(path)?
            .into_iter()
            .filter(|e| e.name.ends_with(".class") && !e.name.starts_with("META-INF/"))
            .map(|e| (e.name, e.bytes))
            .collect(),
    };
    entries
        .into_iter()
        .map(|(entry, bytes)| {
            decoder::read_class(&bytes).map_err(|source| InputError::CorruptClass { entry, source })
        })
        .collect()
}

fn render(class: &ClassModel, metrics: &ClassMetrics, limits: &ComplexityLimits) -> String {
    let mut out = format!(
        "{} extends {} (version {}.{}, access 0x{:04x})\n",
        class.name,
        class.super_name.as_deref().unwrap_or("-"),
        class.version.major,
        class.version.minor,
        class.access
    );
    if !class.interfaces.is_empty() {
        out.push_str(&format!("  implements {}\n", class.interfaces.join(", ")));
    }
    out.push_str(&format!(
        "  {} fields, {} methods, {} instructions, {} code bytes{}\n",
        metrics.field_count,
        metrics.method_count,
        metrics.instruction_count,
        metrics.code_size,
        if metrics::is_class_too_complex(metrics, limits) {
            " [too complex]"
        } else {
            ""
        }
    ));
    for field in &class.fields {
        out.push_str(&format!("  field  {} {}\n", field.name, field.desc));
    }
    for (method, m) in class.methods.iter().zip(&metrics.methods) {
        out.push_str(&format!(
            "  method {}{}  insns={} size={} blocks={} cc={}{}\n",
            m.name,
            m.desc,
            m.instruction_count,
            m.code_size,
            m.block_count,
            m.cyclomatic,
            if metrics::is_method_too_large(method, limits) {
                " [too large]"
            } else {
                ""
            }
        ));
    }
    out
}

/// Executes the `inspect` subcommand.
#[async_trait]
impl super::Command for InspectArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let classes = read_classes(&self.input)?;
        if classes.is_empty() {
            warn!("{} holds no classes", self.input.display());
        }
        let limits = ComplexityLimits::default();
        let collected: Vec<ClassMetrics> = classes.iter().map(metrics::collect_class_metrics).collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&collected)?);
            return Ok(());
        }
        for (class, metrics) in classes.iter().zip(&collected) {
            println!("{}", render(class, metrics, &limits));
        }
        let totals = metrics::size_totals(&classes);
        println!(
            "{} classes, {} methods, {} instructions, {} code bytes",
            totals.classes, totals.methods, totals.instructions, totals.code_size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::{access, Insn, MethodModel, Opcode, OBJECT};

    #[test]
    fn render_lists_members_and_flags_large_methods() {
        let mut class = ClassModel::new("a/Sample", Some(OBJECT));
        class.fields.push(jarcloak_core::FieldModel::new(access::PRIVATE, "count", "I"));
        let mut method = MethodModel::new(access::PUBLIC, "run", "()V");
        method.instructions.push(Insn::op(Opcode::RETURN));
        class.methods.push(method);

        let metrics = metrics::collect_class_metrics(&class);
        let limits = ComplexityLimits {
            max_code_size: 0,
            ..ComplexityLimits::default()
        };
        let text = render(&class, &metrics, &limits);
        assert!(text.starts_with("a/Sample extends java/lang/Object"), "{text}");
        assert!(text.contains("field  count I"));
        assert!(text.contains("method run()V  insns=1"), "{text}");
        assert!(text.contains("[too large]"), "limit of zero bytes flags every method");
    }
}
