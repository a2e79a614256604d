use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;

pub mod inspect;
pub mod obfuscate;

#[derive(Subcommand)]
pub enum Cmd {
    /// Obfuscate the classes of a jar
    Obfuscate(obfuscate::ObfuscateArgs),

    /// Print members, code sizes and complexity of a class or jar
    Inspect(inspect::InspectArgs),
}

#[async_trait]
pub trait Command {
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Obfuscate(args) => args.execute().await,
            Cmd::Inspect(args) => args.execute().await,
        }
    }
}
