/// Module for the `obfuscate` subcommand, which runs the obfuscation pipeline over a jar.
///
/// This module builds the job configuration from an optional JSON file and command-line
/// overrides, reads the input archive and library jars, runs the job on a blocking thread
/// and writes the output jar. It also emits the job report as JSON if requested.
use crate::archive;
use crate::runtime::JdkHome;
use async_trait::async_trait;
use clap::Args;
use jarcloak_transform::config::{ConstantOption, ControlFlowOption, RenameOption};
use jarcloak_transform::obfuscator::ObfuscationReport;
use jarcloak_transform::{DegradationKind, ObfuscationConfig, Obfuscator};
use jarcloak_utils::errors::ObfuscateError;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments for the `obfuscate` subcommand.
#[derive(Args)]
pub struct ObfuscateArgs {
    /// Input jar.
    pub input: PathBuf,
    /// Output jar.
    #[arg(short, long)]
    pub output: PathBuf,
    /// JSON configuration file; flags below override its fields.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Job seed (default: random, logged).
    #[arg(long)]
    pub seed: Option<u64>,
    /// Renaming strategy: off, alphabet, invisible or confusable.
    #[arg(long)]
    pub rename: Option<RenameOption>,
    /// Control flow obfuscation: off, light or heavy.
    #[arg(long)]
    pub control_flow: Option<ControlFlowOption>,
    /// Constant obfuscation: off, light or flow.
    #[arg(long)]
    pub constants: Option<ConstantOption>,
    /// File of exclusion rules, one per line, appended to the configured ones.
    #[arg(long)]
    pub exclude_file: Option<PathBuf>,
    /// Library jar or class file used to resolve types outside the input. Repeatable.
    #[arg(long = "library")]
    pub libraries: Vec<PathBuf>,
    /// JDK or JRE home whose runtime classes resolve JDK types (default: $JAVA_HOME).
    #[arg(long, conflicts_with = "no_jdk")]
    pub jdk: Option<PathBuf>,
    /// Resolve JDK types from the built-in table only.
    #[arg(long)]
    pub no_jdk: bool,
    /// Process classes on one thread.
    #[arg(long)]
    pub sequential: bool,
    /// Path to emit the job report as JSON (optional).
    #[arg(long)]
    pub emit: Option<PathBuf>,
}

impl ObfuscateArgs {
    /// Loads the configuration file, if any, and applies the command-line overrides.
    pub fn build_config(&self) -> Result<ObfuscationConfig, ObfuscateError> {
        let mut config: ObfuscationConfig = match &self.config {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => ObfuscationConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(rename) = self.rename {
            config.options.rename = rename;
        }
        if let Some(control_flow) = self.control_flow {
            config.options.control_flow = control_flow;
        }
        if let Some(constants) = self.constants {
            config.options.constants = constants;
        }
        if let Some(path) = &self.exclude_file {
            let rules = fs::read_to_string(path)?;
            if !config.exclusions.is_empty() && !config.exclusions.ends_with('\n') {
                config.exclusions.push('\n');
            }
            config.exclusions.push_str(&rules);
        }
        if self.sequential {
            config.parallel = false;
        }
        Ok(config)
    }

    /// The JDK home to read runtime classes from, if any.
    pub fn jdk_home(&self) -> Option<JdkHome> {
        if self.no_jdk {
            return None;
        }
        match &self.jdk {
            Some(path) => Some(JdkHome::explicit(path)),
            None => JdkHome::from_env(),
        }
    }

    /// Runs the whole job synchronously. Returns `None` when the job was cancelled and
    /// nothing was written.
    fn run(
        &self,
        config: ObfuscationConfig,
        cancel: Arc<AtomicBool>,
    ) -> Result<Option<ObfuscationReport>, ObfuscateError> {
        let entries = archive::read_input(&self.input)?;
        let library = archive::load_library(&self.libraries, self.jdk_home().as_ref())?;
        let obfuscator = Obfuscator::new(config)?
            .with_library(library)
            .with_cancel_flag(cancel);
        let result = obfuscator.run(entries)?;
        if result.report.cancelled {
            warn!("job cancelled, {} not written", self.output.display());
            return Ok(None);
        }
        archive::write_archive(&self.output, &result.archive)?;
        if let Some(path) = &self.emit {
            fs::write(path, serde_json::to_string_pretty(&result.report)?)?;
            info!("wrote job report to {}", path.display());
        }
        Ok(Some(result.report))
    }
}

fn print_summary(report: &ObfuscationReport, output: &Path) {
    println!("Obfuscation complete: {}", output.display());
    println!("Seed: {}", report.seed);
    println!("Transformers: {}", report.transformers.join(", "));
    println!(
        "Classes: {} in, {} out, {} resources",
        report.classes_in, report.classes_out, report.resources
    );
    if !report.injected.is_empty() {
        println!("Injected: {}", report.injected.join(", "));
    }
    println!(
        "Code size: {} -> {} bytes ({:+.1}%)",
        report.size_before.code_size,
        report.size_after.code_size,
        100.0 * report.growth
    );
    let kinds = [
        ("size reverts", DegradationKind::SizeRevert),
        ("failed transforms", DegradationKind::TransformFailed),
        ("frame fallbacks", DegradationKind::FrameFallback),
        ("resolution fallbacks", DegradationKind::ResolutionFallback),
        ("skipped classes", DegradationKind::ClassSkipped),
        ("duplicate entries", DegradationKind::DuplicateEntry),
        ("renames skipped", DegradationKind::RenameSkipped),
    ];
    for (label, kind) in kinds {
        let count = report.count(kind);
        if count > 0 {
            println!("Warning: {count} {label}");
        }
    }
}

/// Executes the `obfuscate` subcommand.
#[async_trait]
impl super::Command for ObfuscateArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let config = self.build_config()?;

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping before the next entry");
                flag.store(true, Ordering::Relaxed);
            }
        });

        let args = Arc::new(self);
        let job = Arc::clone(&args);
        let outcome = tokio::task::spawn_blocking(move || job.run(config, cancel)).await;
        interrupt.abort();

        match outcome?? {
            Some(report) => {
                print_summary(&report, &args.output);
                Ok(())
            }
            None => Err("obfuscation cancelled, no output written".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ObfuscateArgs,
    }

    fn parse(argv: &[&str]) -> ObfuscateArgs {
        Harness::try_parse_from(std::iter::once("obfuscate").chain(argv.iter().copied()))
            .expect("arguments parse")
            .args
    }

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = dir.path().join("cfg.json");
        fs::write(
            &config,
            r#"{"options":{"rename":"invisible","crasher":true},"exclusions":"a.Keep"}"#,
        )
        .unwrap();
        let rules = dir.path().join("rules.txt");
        fs::write(&rules, "b.*\n").unwrap();

        let args = parse(&[
            "in.jar",
            "-o",
            "out.jar",
            "--config",
            config.to_str().unwrap(),
            "--rename",
            "alphabet",
            "--constants",
            "flow",
            "--seed",
            "7",
            "--exclude-file",
            rules.to_str().unwrap(),
            "--sequential",
        ]);
        let config = args.build_config().unwrap();
        assert_eq!(config.options.rename, RenameOption::Alphabet, "flag wins");
        assert!(config.options.crasher, "file value kept");
        assert_eq!(config.options.constants, ConstantOption::Flow);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.exclusions, "a.Keep\nb.*\n");
        assert!(!config.parallel);
    }

    #[test]
    fn unknown_option_values_are_rejected() {
        let result = Harness::try_parse_from(["obfuscate", "in.jar", "-o", "o.jar", "--rename", "rot13"]);
        assert!(result.is_err());
    }

    #[test]
    fn libraries_are_repeatable() {
        let args = parse(&["in.jar", "-o", "o.jar", "--library", "a.jar", "--library", "b.jar"]);
        assert_eq!(args.libraries, [PathBuf::from("a.jar"), PathBuf::from("b.jar")]);
        assert!(args.config.is_none());
    }

    #[test]
    fn an_explicit_jdk_wins_and_no_jdk_disables_it() {
        let args = parse(&["in.jar", "-o", "o.jar", "--jdk", "/opt/jdk"]);
        assert_eq!(args.jdk_home(), Some(JdkHome::explicit("/opt/jdk")));
        assert_eq!(parse(&["in.jar", "-o", "o.jar", "--no-jdk"]).jdk_home(), None);
        let both = Harness::try_parse_from(["obfuscate", "in.jar", "-o", "o.jar", "--jdk", "/opt/jdk", "--no-jdk"]);
        assert!(both.is_err());
    }
}
