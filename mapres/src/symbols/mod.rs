//! Symbol sharing across tiles.
//!
//! Sharing happens at two levels:
//!
//! - [`SymbolSharingCache`] deduplicates the source groups produced by the
//!   provider, keyed by source object per zoom level.
//! - [`GpuSymbolCache`] deduplicates the device uploads of those groups' symbols.
//!
//! [`PublishedSymbols`] is the draw-ordered view of everything uploaded.

mod gpu_cache;
mod published;
mod sharing;

pub use gpu_cache::{GpuSymbolCache, SharedGpuSymbol, SharedSymbolKey};
pub use published::{PublishedId, PublishedSymbol, PublishedSymbols};
pub use sharing::SymbolSharingCache;

/// Sharing state owned by one symbols collection.
#[derive(Debug, Default)]
pub struct SymbolCaches {
    pub sharing: SymbolSharingCache,
    pub gpu: GpuSymbolCache,
}

impl SymbolCaches {
    pub fn new() -> Self {
        Self::default()
    }
}
