//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::defaults::{clamp_fetch_workers, MAX_STUB_TILE_SIZE};
use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [scheduler] section
    if let Some(section) = ini.section(Some("scheduler")) {
        if let Some(v) = section.get("fetch_workers") {
            let workers: usize = parse_number("scheduler", "fetch_workers", v)?;
            config.scheduler.fetch_workers = clamp_fetch_workers(workers);
        }
    }

    // [gpu] section
    if let Some(section) = ini.section(Some("gpu")) {
        if let Some(v) = section.get("upload_limit") {
            config.gpu.upload_limit = parse_number("gpu", "upload_limit", v)?;
        }
        if let Some(v) = section.get("upload_from_worker_thread") {
            config.gpu.upload_from_worker_thread =
                parse_bool("gpu", "upload_from_worker_thread", v)?;
        }
        if let Some(v) = section.get("stub_tile_size") {
            let size: u32 = parse_number("gpu", "stub_tile_size", v)?;
            if size == 0 || size > MAX_STUB_TILE_SIZE {
                return Err(invalid(
                    "gpu",
                    "stub_tile_size",
                    v,
                    &format!("must be between 1 and {}", MAX_STUB_TILE_SIZE),
                ));
            }
            config.gpu.stub_tile_size = size;
        }
    }

    // [shutdown] section
    if let Some(section) = ini.section(Some("shutdown")) {
        if let Some(v) = section.get("timeout_ms") {
            let millis: u64 = parse_number("shutdown", "timeout_ms", v)?;
            config.shutdown.timeout = Duration::from_millis(millis);
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("logging", "file", v, "must not be empty"));
            }
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a non-negative integer"))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
