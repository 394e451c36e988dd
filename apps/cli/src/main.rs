//! Portfolio CLI: turn a company website into a structured portfolio.
//!
//! Fetches the site, extracts and ranks its content, and asks a language
//! model for a validated company profile.

mod commands;
mod render;

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
