//! Default values and limits for configuration settings.

use std::path::PathBuf;
use std::time::Duration;

use super::settings::*;
use crate::logging::{default_log_dir, default_log_file};

// =============================================================================
// CPU helpers
// =============================================================================

/// Get the number of available CPU cores.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default fetch pool size: max(num_cpus, 2)
pub fn default_fetch_workers() -> usize {
    num_cpus().max(MIN_DEFAULT_FETCH_WORKERS)
}

/// Clamps the fetch pool size to the valid range and logs a warning if clamped.
pub fn clamp_fetch_workers(value: usize) -> usize {
    if value < MIN_FETCH_WORKERS {
        tracing::warn!(
            requested = value,
            min = MIN_FETCH_WORKERS,
            max = MAX_FETCH_WORKERS,
            "fetch_workers below minimum, clamping to {}",
            MIN_FETCH_WORKERS
        );
        MIN_FETCH_WORKERS
    } else if value > MAX_FETCH_WORKERS {
        tracing::warn!(
            requested = value,
            min = MIN_FETCH_WORKERS,
            max = MAX_FETCH_WORKERS,
            "fetch_workers above maximum, clamping to {}",
            MAX_FETCH_WORKERS
        );
        MAX_FETCH_WORKERS
    } else {
        value
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Smallest fetch pool accepted from configuration.
pub const MIN_FETCH_WORKERS: usize = 1;

/// Largest fetch pool accepted from configuration.
pub const MAX_FETCH_WORKERS: usize = 256;

/// Floor of the CPU-derived default pool size.
const MIN_DEFAULT_FETCH_WORKERS: usize = 2;

// =============================================================================
// GPU
// =============================================================================

/// Uploads per `sync_gpu` call; 0 uploads everything that is ready.
pub const DEFAULT_UPLOAD_LIMIT: u32 = 0;

/// Edge length of the placeholder textures in pixels.
pub const DEFAULT_STUB_TILE_SIZE: u32 = 256;

/// Largest placeholder edge length accepted from configuration.
pub const MAX_STUB_TILE_SIZE: u32 = 4096;

// =============================================================================
// Shutdown
// =============================================================================

/// Time granted to in-flight fetches when the manager shuts down.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings {
                fetch_workers: default_fetch_workers(),
            },
            gpu: GpuSettings {
                upload_limit: DEFAULT_UPLOAD_LIMIT,
                upload_from_worker_thread: false,
                stub_tile_size: DEFAULT_STUB_TILE_SIZE,
            },
            shutdown: ShutdownSettings {
                timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
            logging: LoggingSettings {
                directory: PathBuf::from(default_log_dir()),
                file: default_log_file().to_string(),
            },
        }
    }
}
