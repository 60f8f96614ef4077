//! Body of symbol entries.
//!
//! A symbols tile keeps two kinds of groups. Unique groups belong to this tile
//! alone: their bitmaps are uploaded per tile and freed after upload. Shared
//! groups come from the collection's [`SymbolSharingCache`] and their device
//! uploads go through the [`GpuSymbolCache`], so a group visible in four tiles
//! is produced once and uploaded once. Shared bitmaps stay in memory because
//! another tile may need to upload them again after the shared device symbol
//! was released.
//!
//! [`SymbolSharingCache`]: crate::symbols::SymbolSharingCache
//! [`GpuSymbolCache`]: crate::symbols::GpuSymbolCache

use crate::error::{DeviceError, ProviderError};
use crate::gpu::{GpuHandle, GraphicsDevice};
use crate::provider::{SourceObject, SymbolProvider, SymbolsGroup};
use crate::symbols::{PublishedId, PublishedSymbols, SharedGpuSymbol, SharedSymbolKey, SymbolCaches};
use crate::tile::{AreaI, TileId, ZoomLevel};
use std::sync::Arc;

/// Fetched symbol groups of one tile.
#[derive(Debug, Default)]
pub struct TileSymbols {
    pub unique: Vec<SymbolsGroup>,
    pub shared: Vec<Arc<SymbolsGroup>>,
}

impl TileSymbols {
    pub fn symbol_count(&self) -> usize {
        self.unique
            .iter()
            .map(|g| g.symbols.len())
            .chain(self.shared.iter().map(|g| g.symbols.len()))
            .sum()
    }
}

#[derive(Debug)]
enum UploadedSymbol {
    Unique {
        order: i32,
        published: PublishedId,
        handle: GpuHandle,
    },
    Shared(Arc<SharedGpuSymbol>),
}

impl UploadedSymbol {
    fn release(
        self,
        caches: &SymbolCaches,
        device: &dyn GraphicsDevice,
        published: &PublishedSymbols,
    ) {
        match self {
            UploadedSymbol::Unique {
                order,
                published: id,
                handle,
            } => {
                published.unpublish(order, id);
                device.release(handle);
            }
            UploadedSymbol::Shared(shared) => {
                caches.gpu.release(shared, device, published);
            }
        }
    }
}

/// Symbol groups and device symbols of one tile.
#[derive(Debug)]
pub struct SymbolsBody {
    zoom: ZoomLevel,
    caches: Arc<SymbolCaches>,
    data: Option<TileSymbols>,
    uploaded: Vec<UploadedSymbol>,
}

impl SymbolsBody {
    pub fn new(zoom: ZoomLevel, caches: Arc<SymbolCaches>) -> Self {
        Self {
            zoom,
            caches,
            data: None,
            uploaded: Vec::new(),
        }
    }

    pub(crate) fn caches(&self) -> &Arc<SymbolCaches> {
        &self.caches
    }

    /// Fetch the symbols of `tile`, reusing live shared groups.
    ///
    /// An object is shareable when the provider allows it and it reaches
    /// outside the tile; an object fully inside the tile cannot appear in any
    /// other tile. For shareable objects with a live cached group the provider
    /// is told to skip them and this tile takes a hold on the cached group.
    pub(crate) fn fetch(
        caches: &SymbolCaches,
        provider: &dyn SymbolProvider,
        tile: TileId,
        zoom: ZoomLevel,
    ) -> Result<Option<TileSymbols>, ProviderError> {
        let tile_bbox = AreaI::for_tile(tile, zoom);
        let is_shareable = |object: &SourceObject| {
            provider.can_symbols_be_shared(object) && !tile_bbox.contains(&object.bbox31)
        };

        let mut reused = Vec::new();
        let mut filter = |object: &SourceObject| {
            if !is_shareable(object) {
                return true;
            }
            match caches.sharing.lookup(zoom, object.id) {
                Some(group) => {
                    reused.push(group);
                    false
                }
                None => true,
            }
        };
        let fetched = provider.fetch_symbols(tile, zoom, &mut filter);

        let fetched = match fetched {
            Ok(Some(fetched)) => fetched,
            Ok(None) => {
                release_groups(caches, zoom, reused);
                return Ok(None);
            }
            Err(e) => {
                release_groups(caches, zoom, reused);
                return Err(e);
            }
        };

        let mut symbols = TileSymbols {
            unique: Vec::new(),
            shared: reused,
        };
        for group in fetched.groups {
            if is_shareable(&group.object) {
                symbols.shared.push(caches.sharing.share(zoom, group));
            } else {
                symbols.unique.push(group);
            }
        }
        Ok(Some(symbols))
    }

    pub(crate) fn store(&mut self, data: Option<TileSymbols>) {
        if let Some(previous) = std::mem::replace(&mut self.data, data) {
            release_groups(&self.caches, self.zoom, previous.shared);
        }
    }

    /// Upload every symbol of the tile, or none of them.
    pub(crate) fn upload(
        &mut self,
        device: &dyn GraphicsDevice,
        published: &PublishedSymbols,
    ) -> Result<(), DeviceError> {
        if !self.uploaded.is_empty() {
            return Err(DeviceError::Rejected("symbols already uploaded".into()));
        }
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| DeviceError::Rejected("no symbols to upload".into()))?;

        let mut uploaded = Vec::with_capacity(data.symbol_count());
        if let Err(e) = upload_all(data, self.zoom, &self.caches, device, published, &mut uploaded) {
            for symbol in uploaded {
                symbol.release(&self.caches, device, published);
            }
            return Err(e);
        }

        for group in &data.unique {
            for symbol in &group.symbols {
                symbol.release_bitmap();
            }
        }
        self.uploaded = uploaded;
        Ok(())
    }

    pub(crate) fn unload(&mut self, device: &dyn GraphicsDevice, published: &PublishedSymbols) {
        let caches = &self.caches;
        for symbol in self.uploaded.drain(..) {
            symbol.release(caches, device, published);
        }
    }

    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len()
    }

    pub fn data(&self) -> Option<&TileSymbols> {
        self.data.as_ref()
    }
}

impl Drop for SymbolsBody {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            release_groups(&self.caches, self.zoom, data.shared);
        }
    }
}

fn release_groups(caches: &SymbolCaches, zoom: ZoomLevel, groups: Vec<Arc<SymbolsGroup>>) {
    for group in groups {
        caches.sharing.release(zoom, group);
    }
}

fn upload_all(
    data: &TileSymbols,
    zoom: ZoomLevel,
    caches: &SymbolCaches,
    device: &dyn GraphicsDevice,
    published: &PublishedSymbols,
    uploaded: &mut Vec<UploadedSymbol>,
) -> Result<(), DeviceError> {
    for group in &data.unique {
        for symbol in &group.symbols {
            let handle = device.upload_symbol(symbol)?;
            uploaded.push(UploadedSymbol::Unique {
                order: symbol.order,
                published: published.publish(symbol.order, group.object.id, handle.raw()),
                handle,
            });
        }
    }

    for group in &data.shared {
        for (index, symbol) in group.symbols.iter().enumerate() {
            let key = SharedSymbolKey {
                zoom,
                object_id: group.object.id,
                symbol_index: index as u32,
            };
            let shared = caches.gpu.obtain_or_upload(key, symbol, device, published)?;
            uploaded.push(UploadedSymbol::Shared(shared));
        }
    }
    Ok(())
}
