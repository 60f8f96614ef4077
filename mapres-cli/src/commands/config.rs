//! Configuration inspection commands.

use std::path::Path;

use clap::Subcommand;
use mapres::config::{config_file_path, ConfigFile};

use crate::error::CliError;
use crate::runner::load_config;

/// Config action subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Print the default configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(config_path: Option<&Path>, action: ConfigAction) -> Result<(), CliError> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            print!("{}", render(&config));
            Ok(())
        }
        ConfigAction::Path => {
            println!("{}", config_file_path().display());
            Ok(())
        }
    }
}

fn render(config: &ConfigFile) -> String {
    format!(
        "[scheduler]\n\
         fetch_workers = {}\n\
         \n\
         [gpu]\n\
         upload_limit = {}\n\
         upload_from_worker_thread = {}\n\
         stub_tile_size = {}\n\
         \n\
         [shutdown]\n\
         timeout_ms = {}\n\
         \n\
         [logging]\n\
         directory = {}\n\
         file = {}\n",
        config.scheduler.fetch_workers,
        config.gpu.upload_limit,
        config.gpu.upload_from_worker_thread,
        config.gpu.stub_tile_size,
        config.shutdown.timeout.as_millis(),
        config.logging.directory.display(),
        config.logging.file,
    )
}
