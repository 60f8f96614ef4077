//! Error types for the resource manager.
//!
//! Failures fall into four groups:
//!
//! - Provider failures ([`ProviderError`]) are transient. The affected entry is
//!   discarded and the tile is requested again on the next scheduling pass.
//! - Missing data is not an error at all. Providers return `Ok(None)` and the
//!   entry settles in `Unavailable`.
//! - Device failures ([`DeviceError`]) leave the entry waiting for the next
//!   GPU sync.
//! - Invariant violations are scheduling bugs. They are reported through
//!   [`invariant_violation!`](crate::invariant_violation), which aborts debug
//!   builds and logs loudly in release builds.

use crate::config::ConfigFileError;
use crate::tile::MAX_ZOOM_LEVEL;
use thiserror::Error;

/// Errors raised while constructing tile coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// Zoom level outside `0..=31`
    #[error("zoom level {0} is outside 0..={max}", max = MAX_ZOOM_LEVEL)]
    InvalidZoom(u8),
}

/// Errors reported by tile and symbol providers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Underlying storage or network read failed
    #[error("provider I/O failed: {0}")]
    Io(String),

    /// Data was found but could not be decoded
    #[error("malformed tile data: {0}")]
    Malformed(String),

    /// The collection no longer has a bound provider
    #[error("no provider bound to collection {0}")]
    Unbound(u64),

    /// Provider kind does not match the resource type of the collection
    #[error("provider does not serve {0} resources")]
    KindMismatch(&'static str),
}

/// Errors reported by the graphics device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Not enough device memory for the allocation
    #[error("out of device memory (requested {requested} bytes)")]
    OutOfMemory { requested: usize },

    /// The device refused the payload
    #[error("upload rejected: {0}")]
    Rejected(String),

    /// The graphics context is gone
    #[error("graphics device lost")]
    Lost,
}

/// Errors raised by [`MapResources`](crate::resources::MapResources) setup.
#[derive(Debug, Error)]
pub enum ResourcesError {
    /// Failed to build the tokio runtime backing the fetch pool
    #[error("failed to create runtime: {0}")]
    RuntimeCreation(String),

    /// Failed to upload the placeholder tiles
    #[error("failed to upload stub tile: {0}")]
    StubUpload(#[source] DeviceError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigFileError),
}

/// Report a broken state-machine invariant.
///
/// Logs on the `mapres::invariant` target and trips a `debug_assert!`, so debug
/// builds abort at the point of the bug while release builds keep running.
#[macro_export]
macro_rules! invariant_violation {
    ($($arg:tt)+) => {{
        ::tracing::error!(target: "mapres::invariant", $($arg)+);
        debug_assert!(false, $($arg)+);
    }};
}
