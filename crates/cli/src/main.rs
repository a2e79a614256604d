/// Entry point for the Jarcloak CLI, a JVM class file obfuscation tool.
///
/// This module parses command-line arguments, initializes logging and dispatches to the
/// `obfuscate` and `inspect` subcommands.
use clap::Parser;
use jarcloak_cli::commands::{Cmd, Command};
use tracing_subscriber::EnvFilter;

/// Command-line interface for Jarcloak.
///
/// Jarcloak renames classes and members, obfuscates control flow and constants, strips debug
/// information and adds watermarks to the classes of a jar.
#[derive(Parser)]
#[command(name = "jarcloak", version)]
#[command(about = "Jarcloak: JVM class file obfuscator")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Log at debug level. `RUST_LOG` takes precedence when set.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Runs the Jarcloak CLI with the provided arguments.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli.command.execute().await
}
