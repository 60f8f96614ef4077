//! mapres CLI - drive the resource cache without a real renderer.
//!
//! `mapres simulate` pans a camera across procedurally generated providers,
//! runs one GPU sync per frame against a headless device and checks that
//! every device allocation is released on shutdown.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigAction;
use commands::simulate::SimulateArgs;

#[derive(Parser)]
#[command(name = "mapres")]
#[command(version = mapres::VERSION)]
#[command(about = "Headless driver for the mapres tiled resource cache", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.mapres/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pan a camera across synthetic providers and report cache activity
    Simulate(SimulateArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate(args) => commands::simulate::run(cli.config.as_deref(), args),
        Commands::Config { action } => commands::config::run(cli.config.as_deref(), action),
    };

    if let Err(e) = result {
        e.exit();
    }
}
