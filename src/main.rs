// src/main.rs
use anyhow::Context;
use clap::Parser;

use passman_sync::cli;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    log::info!("Starting passman");

    let cli_args = cli::Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    if let Err(e) = runtime.block_on(cli::handle_cli_command(cli_args)) {
        log::error!("Application failed: {:#?}", e);
        return Err(e.into());
    }

    log::info!("passman finished successfully.");
    Ok(())
}
