//! mapres - Tiled map resource cache for GPU renderers
//!
//! This library keeps the resources a map renderer needs for the visible area
//! (elevation grids, raster layers and map symbols) in per-provider tile
//! collections. Resources are fetched from providers on a background pool,
//! uploaded to the graphics device from the render thread and evicted as soon
//! as they leave the active zone.
//!
//! # Example
//!
//! ```
//! use mapres::bindings::ProviderSet;
//! use mapres::error::ProviderError;
//! use mapres::gpu::HeadlessDevice;
//! use mapres::provider::{TileData, TileProvider};
//! use mapres::resources::MapResources;
//! use mapres::tile::{TileId, ZoomLevel};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Grey;
//!
//! impl TileProvider for Grey {
//!     fn fetch_tile(&self, _: TileId, _: ZoomLevel) -> Result<Option<TileData>, ProviderError> {
//!         Ok(Some(TileData::new(1, 1, false, vec![128u8; 4])))
//!     }
//! }
//!
//! let resources = MapResources::builder(Arc::new(HeadlessDevice::new())).build().unwrap();
//! resources.set_providers(ProviderSet::base_layer(Arc::new(Grey)));
//! resources.set_active_zone([TileId::new(2, 3)], ZoomLevel::new(5).unwrap());
//! resources.wait_for_requests(Duration::from_secs(5));
//!
//! let report = resources.sync_gpu(0);
//! assert_eq!(report.uploaded, 1);
//! resources.shutdown();
//! ```

pub mod bindings;
pub mod config;
pub mod error;
pub mod gpu;
pub mod hooks;
pub mod logging;
pub mod provider;
pub mod resource;
pub mod resources;
pub mod scheduler;
pub mod stub;
pub mod symbols;
pub mod sync;
pub mod tile;

pub use bindings::ProviderSet;
pub use error::{DeviceError, ProviderError, ResourcesError};
pub use resources::{DrawTile, MapResources, ResourcesStats};
pub use sync::SyncReport;
pub use tile::{ResourceType, TileId, ZoomLevel};

/// Version of the mapres library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
