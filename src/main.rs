mod analysis;
mod config;
mod field;
mod manager;
mod spectrum;
mod stats;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    cmp_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Analyze,

    Compare {
        #[arg(long, default_value = "reference")]
        reference: String,
    },

    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.cmp_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Analyze => mgr.analyze_fields()?,
        Command::Compare { reference } => mgr.compare_fields(&reference)?,
        Command::Clean => mgr.clean_outputs()?,
    }

    Ok(())
}
