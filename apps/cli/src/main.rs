//! contactlink CLI: reconcile contact observations into identity clusters.
//!
//! Every observation (email and/or phone number) is linked to the oldest
//! known contact it shares a field with; the CLI prints the consolidated view.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
