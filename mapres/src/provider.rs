//! Data providers and the payloads they produce.
//!
//! Providers are the external collaborators that turn map data into pixels and
//! symbols. They are called from fetch workers, never from the GPU thread, and
//! they report failure through `Result` values. `Ok(None)` means the provider
//! has nothing for the tile and the entry settles in `Unavailable`.
//!
//! A provider's identity is its allocation: two `Arc`s pointing at the same
//! provider are the same binding, two equal providers in separate allocations
//! are different bindings.

use crate::error::ProviderError;
use crate::tile::{AreaI, TileId, ZoomLevel};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

// =============================================================================
// Provider traits
// =============================================================================

/// Source of raster map or elevation tiles.
pub trait TileProvider: Send + Sync + 'static {
    /// Produce the payload for one tile.
    fn fetch_tile(&self, tile: TileId, zoom: ZoomLevel) -> Result<Option<TileData>, ProviderError>;
}

/// Source of map symbols.
pub trait SymbolProvider: Send + Sync + 'static {
    /// Produce the symbols of one tile.
    ///
    /// `filter` is consulted once per source object before its symbols are
    /// built. When it returns false the provider must skip the object: the
    /// cache already holds a live group for it.
    fn fetch_symbols(
        &self,
        tile: TileId,
        zoom: ZoomLevel,
        filter: &mut dyn FnMut(&SourceObject) -> bool,
    ) -> Result<Option<SymbolsTile>, ProviderError>;

    /// Whether symbols of `object` may be shared between tiles.
    fn can_symbols_be_shared(&self, object: &SourceObject) -> bool;
}

/// Opaque identity of a bound provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(usize);

impl ProviderId {
    /// Identity of the allocation behind `provider`.
    pub fn of<T: ?Sized>(provider: &Arc<T>) -> Self {
        Self(Arc::as_ptr(provider) as *const () as usize)
    }
}

// =============================================================================
// Tile payloads
// =============================================================================

/// Bitmap or elevation grid for a single tile.
#[derive(Debug, Clone)]
pub struct TileData {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pixels: Bytes,
    retainable: bool,
}

impl TileData {
    pub fn new(width: u32, height: u32, has_alpha: bool, pixels: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            has_alpha,
            pixels: pixels.into(),
            retainable: false,
        }
    }

    /// Keep this payload's metadata after upload. Only the pixel bytes are freed.
    pub fn retainable(mut self) -> Self {
        self.retainable = true;
        self
    }

    pub fn is_retainable(&self) -> bool {
        self.retainable
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// True once the pixel bytes have been handed to the device and dropped.
    pub fn is_released(&self) -> bool {
        self.pixels.is_empty()
    }

    pub(crate) fn release_pixels(&mut self) {
        self.pixels = Bytes::new();
    }
}

// =============================================================================
// Symbol payloads
// =============================================================================

/// Map object a group of symbols was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceObject {
    pub id: u64,
    pub bbox31: AreaI,
}

/// One renderable symbol.
#[derive(Debug)]
pub struct MapSymbol {
    /// Draw order; lower values draw first.
    pub order: i32,
    pub location31: (i32, i32),
    /// Screen-space offset from the anchor, in pixels.
    pub offset: (i32, i32),
    bitmap: Mutex<Option<Bytes>>,
}

impl MapSymbol {
    pub fn new(order: i32, location31: (i32, i32), bitmap: impl Into<Bytes>) -> Self {
        Self {
            order,
            location31,
            offset: (0, 0),
            bitmap: Mutex::new(Some(bitmap.into())),
        }
    }

    pub fn with_offset(mut self, x: i32, y: i32) -> Self {
        self.offset = (x, y);
        self
    }

    /// Bitmap bytes, if not yet released.
    pub fn bitmap(&self) -> Option<Bytes> {
        self.bitmap.lock().clone()
    }

    pub fn has_bitmap(&self) -> bool {
        self.bitmap.lock().is_some()
    }

    pub(crate) fn release_bitmap(&self) {
        self.bitmap.lock().take();
    }
}

/// All symbols derived from one source object.
#[derive(Debug)]
pub struct SymbolsGroup {
    pub object: SourceObject,
    pub symbols: Vec<MapSymbol>,
}

impl SymbolsGroup {
    pub fn new(object: SourceObject, symbols: Vec<MapSymbol>) -> Self {
        Self { object, symbols }
    }
}

/// Symbols produced for one tile.
#[derive(Debug, Default)]
pub struct SymbolsTile {
    pub groups: Vec<SymbolsGroup>,
}

impl SymbolsTile {
    pub fn new(groups: Vec<SymbolsGroup>) -> Self {
        Self { groups }
    }
}

// =============================================================================
// Bound providers
// =============================================================================

/// A provider as stored in the binding registry.
#[derive(Clone)]
pub enum BoundProvider {
    Tile(Arc<dyn TileProvider>),
    Symbols(Arc<dyn SymbolProvider>),
}

impl BoundProvider {
    pub fn id(&self) -> ProviderId {
        match self {
            BoundProvider::Tile(p) => ProviderId::of(p),
            BoundProvider::Symbols(p) => ProviderId::of(p),
        }
    }
}

impl std::fmt::Debug for BoundProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundProvider::Tile(_) => write!(f, "Tile({:?})", self.id()),
            BoundProvider::Symbols(_) => write!(f, "Symbols({:?})", self.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl TileProvider for Empty {
        fn fetch_tile(&self, _: TileId, _: ZoomLevel) -> Result<Option<TileData>, ProviderError> {
            Ok(None)
        }
    }

    #[test]
    fn test_provider_identity_is_allocation() {
        let a: Arc<dyn TileProvider> = Arc::new(Empty);
        let b: Arc<dyn TileProvider> = Arc::new(Empty);
        let a2 = Arc::clone(&a);

        assert_eq!(ProviderId::of(&a), ProviderId::of(&a2));
        assert_ne!(ProviderId::of(&a), ProviderId::of(&b));
        assert_eq!(BoundProvider::Tile(a).id(), ProviderId::of(&a2));
    }

    #[test]
    fn test_tile_data_release_keeps_metadata() {
        let mut data = TileData::new(2, 2, true, vec![0u8; 16]).retainable();
        assert!(data.is_retainable());
        assert!(!data.is_released());

        data.release_pixels();
        assert!(data.is_released());
        assert_eq!(data.width, 2);
        assert!(data.has_alpha);
    }

    #[test]
    fn test_symbol_bitmap_release() {
        let symbol = MapSymbol::new(3, (10, 20), vec![1u8, 2, 3]);
        assert_eq!(symbol.bitmap().map(|b| b.len()), Some(3));

        symbol.release_bitmap();
        assert!(!symbol.has_bitmap());
        assert!(symbol.bitmap().is_none());
    }
}
