#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

use agentplane::cli::Cli;
use agentplane::{Config, app, observability};
use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_init(cli.config.as_deref())?;

    observability::init_tracing(&config.observability);

    app::dispatch(cli, config).await
}
