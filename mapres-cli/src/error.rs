//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

use mapres::config::ConfigFileError;
use mapres::error::TileError;
use mapres::ResourcesError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be loaded
    Config(ConfigFileError),
    /// Command-line value out of range
    InvalidArgument(String),
    /// Resource manager could not start
    Startup(ResourcesError),
    /// Fetches did not settle before the deadline
    Timeout,
    /// Device allocations outlived the manager
    Leak { allocations: usize },
}

impl CliError {
    /// Print the error and exit with a non-zero code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(_) = self {
            eprintln!();
            eprintln!(
                "Check {} or pass another file with --config",
                mapres::config::config_file_path().display()
            );
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Startup(e) => write!(f, "Failed to start resource manager: {}", e),
            CliError::Timeout => write!(f, "Timed out waiting for fetches to settle"),
            CliError::Leak { allocations } => {
                write!(f, "{} device allocations left after shutdown", allocations)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Startup(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<ResourcesError> for CliError {
    fn from(e: ResourcesError) -> Self {
        CliError::Startup(e)
    }
}

impl From<TileError> for CliError {
    fn from(e: TileError) -> Self {
        CliError::InvalidArgument(e.to_string())
    }
}
