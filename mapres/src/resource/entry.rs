//! A single cached tile resource.

use super::collection::CollectionId;
use super::state::{ResourceState, StateCell};
use super::symbols::SymbolsBody;
use super::tile::TileBody;
use crate::error::{DeviceError, ProviderError};
use crate::gpu::GraphicsDevice;
use crate::provider::BoundProvider;
use crate::symbols::PublishedSymbols;
use crate::tile::{ResourceType, TileId, ZoomLevel};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Type-specific payload of an entry.
#[derive(Debug)]
pub enum EntryBody {
    Tile(TileBody),
    Symbols(SymbolsBody),
}

/// One resource of one tile in one collection.
///
/// Owned by its [`TiledCollection`](super::TiledCollection). A fetch task keeps
/// a strong reference while it runs, so an entry may outlive its removal from
/// the collection by the duration of one provider call.
#[derive(Debug)]
pub struct ResourceEntry {
    collection_id: CollectionId,
    resource_type: ResourceType,
    tile: TileId,
    zoom: ZoomLevel,
    state: StateCell,
    request: Mutex<Option<CancellationToken>>,
    body: Mutex<EntryBody>,
}

impl ResourceEntry {
    pub fn new(
        collection_id: CollectionId,
        resource_type: ResourceType,
        tile: TileId,
        zoom: ZoomLevel,
        body: EntryBody,
    ) -> Self {
        Self {
            collection_id,
            resource_type,
            tile,
            zoom,
            state: StateCell::new(ResourceState::Unknown),
            request: Mutex::new(None),
            body: Mutex::new(body),
        }
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn tile(&self) -> TileId {
        self.tile
    }

    pub fn zoom(&self) -> ZoomLevel {
        self.zoom
    }

    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub fn set_state_if(&self, expected: ResourceState, next: ResourceState) -> bool {
        self.state.set_state_if(expected, next)
    }

    pub fn set_state_if_any(
        &self,
        candidates: &[ResourceState],
        next: ResourceState,
    ) -> Option<ResourceState> {
        self.state.set_state_if_any(candidates, next)
    }

    pub fn body(&self) -> MutexGuard<'_, EntryBody> {
        self.body.lock()
    }

    // =========================================================================
    // Outstanding request
    // =========================================================================

    pub(crate) fn attach_request(&self, token: CancellationToken) {
        *self.request.lock() = Some(token);
    }

    pub(crate) fn detach_request(&self) -> Option<CancellationToken> {
        self.request.lock().take()
    }

    /// Ask the outstanding fetch task to stop. Returns false if there is none.
    pub(crate) fn cancel_request(&self) -> bool {
        match self.request.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// True while a fetch task reference is attached.
    pub fn has_request(&self) -> bool {
        self.request.lock().is_some()
    }

    // =========================================================================
    // Data and device operations
    // =========================================================================

    /// Run the provider for this entry and keep the result.
    ///
    /// Returns whether the provider had data. The body lock is not held during
    /// the provider call.
    pub(crate) fn fetch(&self, provider: &BoundProvider) -> Result<bool, ProviderError> {
        let mismatch = || ProviderError::KindMismatch(self.resource_type.name());

        match provider {
            BoundProvider::Tile(provider) => {
                if !matches!(*self.body.lock(), EntryBody::Tile(_)) {
                    return Err(mismatch());
                }
                let data = provider.fetch_tile(self.tile, self.zoom)?;
                let available = data.is_some();
                if let EntryBody::Tile(body) = &mut *self.body.lock() {
                    body.store(data);
                }
                Ok(available)
            }
            BoundProvider::Symbols(provider) => {
                let caches = match &*self.body.lock() {
                    EntryBody::Symbols(body) => Arc::clone(body.caches()),
                    EntryBody::Tile(_) => return Err(mismatch()),
                };
                let symbols = SymbolsBody::fetch(&caches, provider.as_ref(), self.tile, self.zoom)?;
                let available = symbols.is_some();
                if let EntryBody::Symbols(body) = &mut *self.body.lock() {
                    body.store(symbols);
                }
                Ok(available)
            }
        }
    }

    pub(crate) fn upload(
        &self,
        device: &dyn GraphicsDevice,
        published: &PublishedSymbols,
    ) -> Result<(), DeviceError> {
        match &mut *self.body.lock() {
            EntryBody::Tile(body) => body.upload(device),
            EntryBody::Symbols(body) => body.upload(device, published),
        }
    }

    pub(crate) fn unload(&self, device: &dyn GraphicsDevice, published: &PublishedSymbols) {
        match &mut *self.body.lock() {
            EntryBody::Tile(body) => body.unload(device),
            EntryBody::Symbols(body) => body.unload(device, published),
        }
    }

    /// Texture reference of an uploaded raster or elevation tile.
    pub fn texture(&self) -> Option<u64> {
        match &*self.body.lock() {
            EntryBody::Tile(body) => body.texture(),
            EntryBody::Symbols(_) => None,
        }
    }
}

impl Drop for ResourceEntry {
    fn drop(&mut self) {
        let state = self.state.get();
        if state.is_gpu_resident() && !std::thread::panicking() {
            crate::invariant_violation!(
                "resource {}@{} of {} dropped while {} (GPU memory leaked)",
                self.tile,
                self.zoom,
                self.collection_id,
                state
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::gpu::HeadlessDevice;
    use crate::provider::{TileData, TileProvider};

    struct Solid;

    impl TileProvider for Solid {
        fn fetch_tile(&self, _: TileId, _: ZoomLevel) -> Result<Option<TileData>, ProviderError> {
            Ok(Some(TileData::new(1, 1, false, vec![0u8; 4])))
        }
    }

    fn entry() -> ResourceEntry {
        ResourceEntry::new(
            CollectionId::next(),
            ResourceType::RasterMap,
            TileId::new(2, 3),
            ZoomLevel::new(5).unwrap(),
            EntryBody::Tile(TileBody::new()),
        )
    }

    #[test]
    fn test_new_entry_is_unknown() {
        let entry = entry();
        assert_eq!(entry.state(), ResourceState::Unknown);
        assert!(!entry.has_request());
        assert!(entry.texture().is_none());
    }

    #[test]
    fn test_cancel_request_flags_token() {
        let entry = entry();
        assert!(!entry.cancel_request());

        let token = CancellationToken::new();
        entry.attach_request(token.clone());
        assert!(entry.cancel_request());
        assert!(token.is_cancelled());
        assert!(entry.detach_request().is_some());
        assert!(!entry.has_request());
    }

    #[test]
    fn test_fetch_upload_unload() {
        let entry = entry();
        let device = HeadlessDevice::new();
        let published = PublishedSymbols::new();

        let provider = BoundProvider::Tile(Arc::new(Solid));
        assert_eq!(entry.fetch(&provider), Ok(true));
        entry.upload(&device, &published).unwrap();
        assert!(entry.texture().is_some());

        entry.unload(&device, &published);
        assert!(entry.texture().is_none());
        assert_eq!(device.live_allocations(), 0);
    }
}
