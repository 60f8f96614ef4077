//! Configuration for the resource manager.
//!
//! Two layers:
//!
//! - [`ResourcesConfig`]: what [`MapResources`](crate::resources::MapResources)
//!   is built with. Plain struct with `with_*` setters.
//! - [`ConfigFile`]: the INI file at `~/.mapres/config.ini`, which maps onto a
//!   `ResourcesConfig` plus logging settings.
//!
//! # Example
//!
//! ```
//! use mapres::config::ConfigFile;
//!
//! let file = ConfigFile::from_ini_str("[gpu]\nupload_limit = 8\n").unwrap();
//! let config = file.resources_config();
//! assert_eq!(config.upload_limit, 8);
//! ```

pub mod defaults;
mod file;
mod parser;
mod resources;
mod settings;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use resources::ResourcesConfig;
pub use settings::{ConfigFile, GpuSettings, LoggingSettings, SchedulerSettings, ShutdownSettings};
