//! Runtime configuration of [`MapResources`](crate::resources::MapResources).

use std::time::Duration;

use super::defaults::{
    default_fetch_workers, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STUB_TILE_SIZE, DEFAULT_UPLOAD_LIMIT,
};

/// Settings the resource manager is built with.
///
/// # Example
///
/// ```
/// use mapres::config::ResourcesConfig;
/// use std::time::Duration;
///
/// let config = ResourcesConfig::default()
///     .with_fetch_workers(4)
///     .with_upload_limit(16)
///     .with_shutdown_timeout(Duration::from_secs(2));
/// assert_eq!(config.fetch_workers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcesConfig {
    /// Maximum concurrent provider fetches.
    pub fetch_workers: usize,

    /// Default per-frame upload budget used by drivers (0 = unbounded).
    pub upload_limit: u32,

    /// Set when a dedicated worker thread owns the device. Uploads then wait
    /// for device completion before entries become drawable.
    pub upload_from_worker_thread: bool,

    /// Time to wait for in-flight fetches on shutdown.
    pub shutdown_timeout: Duration,

    /// Edge length of the placeholder textures.
    pub stub_tile_size: u32,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            fetch_workers: default_fetch_workers(),
            upload_limit: DEFAULT_UPLOAD_LIMIT,
            upload_from_worker_thread: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stub_tile_size: DEFAULT_STUB_TILE_SIZE,
        }
    }
}

impl ResourcesConfig {
    pub fn with_fetch_workers(mut self, workers: usize) -> Self {
        self.fetch_workers = workers.max(1);
        self
    }

    pub fn with_upload_limit(mut self, limit: u32) -> Self {
        self.upload_limit = limit;
        self
    }

    pub fn with_upload_from_worker_thread(mut self, enabled: bool) -> Self {
        self.upload_from_worker_thread = enabled;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_stub_tile_size(mut self, size: u32) -> Self {
        self.stub_tile_size = size.max(1);
        self
    }
}
