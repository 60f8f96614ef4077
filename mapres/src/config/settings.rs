//! Settings structs mirroring the sections of `config.ini`.

use std::path::PathBuf;
use std::time::Duration;

use super::resources::ResourcesConfig;

/// Contents of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub scheduler: SchedulerSettings,
    pub gpu: GpuSettings,
    pub shutdown: ShutdownSettings,
    pub logging: LoggingSettings,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Concurrent provider fetches. Default: max(num_cpus, 2)
    pub fetch_workers: usize,
}

/// `[gpu]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuSettings {
    /// Uploads per sync call, 0 for no limit.
    pub upload_limit: u32,
    /// Wait for device completion after each upload batch.
    pub upload_from_worker_thread: bool,
    /// Placeholder texture edge length in pixels.
    pub stub_tile_size: u32,
}

/// `[shutdown]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSettings {
    /// Stored as `timeout_ms`.
    pub timeout: Duration,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}

impl ConfigFile {
    /// Manager settings described by this file.
    pub fn resources_config(&self) -> ResourcesConfig {
        ResourcesConfig::default()
            .with_fetch_workers(self.scheduler.fetch_workers)
            .with_upload_limit(self.gpu.upload_limit)
            .with_upload_from_worker_thread(self.gpu.upload_from_worker_thread)
            .with_stub_tile_size(self.gpu.stub_tile_size)
            .with_shutdown_timeout(self.shutdown.timeout)
    }
}
