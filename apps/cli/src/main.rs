//! PageWatch CLI: watch one element of a web page for changes.
//!
//! Runs the monitoring daemon and manages targets and their observation
//! history in the local database.

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
