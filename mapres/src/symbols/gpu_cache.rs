//! Device-level deduplication of shared symbols.
//!
//! Two tiles holding the same shared group must not upload its bitmaps twice.
//! Each uploaded shared symbol is an `Arc<SharedGpuSymbol>` owned by the tiles
//! that use it; this cache keeps a weak side table so later uploads can find
//! it. Whoever drops the last strong reference hands the handle back to the
//! device.

use super::published::{PublishedId, PublishedSymbols};
use crate::error::DeviceError;
use crate::gpu::{GpuHandle, GraphicsDevice};
use crate::provider::MapSymbol;
use crate::tile::ZoomLevel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Identity of one symbol inside a shared group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedSymbolKey {
    pub zoom: ZoomLevel,
    pub object_id: u64,
    pub symbol_index: u32,
}

/// Uploaded symbol shared by one or more tiles.
#[derive(Debug)]
pub struct SharedGpuSymbol {
    key: SharedSymbolKey,
    order: i32,
    published: PublishedId,
    handle: GpuHandle,
}

impl SharedGpuSymbol {
    pub fn key(&self) -> SharedSymbolKey {
        self.key
    }

    pub fn texture(&self) -> u64 {
        self.handle.raw()
    }
}

/// Weak side table of shared device symbols.
#[derive(Debug, Default)]
pub struct GpuSymbolCache {
    entries: Mutex<HashMap<SharedSymbolKey, Weak<SharedGpuSymbol>>>,
}

impl GpuSymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a hold on the device symbol for `key`, uploading it on first use.
    pub fn obtain_or_upload(
        &self,
        key: SharedSymbolKey,
        symbol: &MapSymbol,
        device: &dyn GraphicsDevice,
        published: &PublishedSymbols,
    ) -> Result<Arc<SharedGpuSymbol>, DeviceError> {
        let mut entries = self.entries.lock();
        if let Some(live) = entries.get(&key).and_then(Weak::upgrade) {
            return Ok(live);
        }

        let handle = device.upload_symbol(symbol)?;
        let shared = Arc::new(SharedGpuSymbol {
            key,
            order: symbol.order,
            published: published.publish(symbol.order, key.object_id, handle.raw()),
            handle,
        });
        entries.insert(key, Arc::downgrade(&shared));
        Ok(shared)
    }

    /// Drop one tile's hold, releasing the device symbol if it was the last.
    ///
    /// Returns true when the device allocation was released.
    pub fn release(
        &self,
        symbol: Arc<SharedGpuSymbol>,
        device: &dyn GraphicsDevice,
        published: &PublishedSymbols,
    ) -> bool {
        let mut entries = self.entries.lock();
        match Arc::try_unwrap(symbol) {
            Ok(last) => {
                entries.remove(&last.key);
                published.unpublish(last.order, last.published);
                device.release(last.handle);
                true
            }
            Err(_) => false,
        }
    }

    /// Number of live shared symbols.
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
