//! CLI runner for common setup.
//!
//! Loads the configuration file and starts logging before any command runs.

use std::path::Path;

use mapres::config::{config_file_path, ConfigFile};
use mapres::logging::{init_logging, LoggingGuard};
use tracing::info;

use crate::error::CliError;

/// Keeps logging alive and holds the loaded configuration.
pub struct CliRunner {
    _logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Load `config_path` (or the default file) and initialize logging.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let config = load_config(config_path)?;

        let logging_guard = init_logging(&config.logging.directory, &config.logging.file)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!(version = mapres::VERSION, command, "mapres starting");
    }
}

/// Load configuration without touching logging.
pub fn load_config(config_path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match config_path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load_from(&config_file_path())?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(Some(&temp.path().join("absent.ini"))).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, "[gpu]\nstub_tile_size = huge\n").unwrap();

        assert!(matches!(load_config(Some(&path)), Err(CliError::Config(_))));
    }
}
