//! Provider to collection bindings.
//!
//! Each active provider owns exactly one collection. When the renderer hands
//! over a new provider set, [`BindingRegistry::reconcile`] keeps the
//! collections of providers that are still present (including raster
//! providers that moved to another layer slot), creates empty collections for
//! newcomers, and returns the collections of providers that went away so the
//! caller can release their device resources.

use crate::provider::{BoundProvider, ProviderId, SymbolProvider, TileProvider};
use crate::resource::{CollectionId, TiledCollection};
use crate::tile::{ResourceType, RASTER_MAP_LAYERS_COUNT};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Replacement provider set for one resource type.
#[derive(Clone)]
pub enum ProviderSet {
    /// Single elevation provider, or none.
    Elevation(Option<Arc<dyn TileProvider>>),
    /// One optional provider per raster layer slot.
    RasterLayers([Option<Arc<dyn TileProvider>>; RASTER_MAP_LAYERS_COUNT]),
    /// Unordered symbol providers.
    Symbols(Vec<Arc<dyn SymbolProvider>>),
}

impl ProviderSet {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ProviderSet::Elevation(_) => ResourceType::ElevationData,
            ProviderSet::RasterLayers(_) => ResourceType::RasterMap,
            ProviderSet::Symbols(_) => ResourceType::Symbols,
        }
    }

    /// Raster set with only the base layer filled.
    pub fn base_layer(provider: Arc<dyn TileProvider>) -> Self {
        let mut layers: [Option<Arc<dyn TileProvider>>; RASTER_MAP_LAYERS_COUNT] =
            Default::default();
        layers[0] = Some(provider);
        ProviderSet::RasterLayers(layers)
    }
}

/// A provider and the collection it fills.
#[derive(Clone, Debug)]
pub struct Binding {
    pub provider: BoundProvider,
    pub collection: Arc<TiledCollection>,
}

impl Binding {
    fn new(provider: BoundProvider, resource_type: ResourceType) -> Self {
        Self {
            provider,
            collection: Arc::new(TiledCollection::new(resource_type)),
        }
    }
}

#[derive(Default)]
struct Bindings {
    elevation: Option<Binding>,
    raster: [Option<Binding>; RASTER_MAP_LAYERS_COUNT],
    symbols: Vec<Binding>,
}

impl Bindings {
    fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.elevation
            .iter()
            .chain(self.raster.iter().flatten())
            .chain(self.symbols.iter())
    }
}

/// Registry of active bindings.
#[derive(Default)]
pub struct BindingRegistry {
    inner: RwLock<Bindings>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the providers of one resource type.
    ///
    /// Returns the collections whose providers were dropped. They are no
    /// longer reachable through the registry; the caller must release them.
    pub fn reconcile(&self, set: ProviderSet) -> Vec<Arc<TiledCollection>> {
        let mut inner = self.inner.write();
        let removed = match set {
            ProviderSet::Elevation(provider) => {
                let provider = provider.map(BoundProvider::Tile);
                let keep = matches!(
                    (&inner.elevation, &provider),
                    (Some(current), Some(next)) if current.provider.id() == next.id()
                );
                if keep {
                    Vec::new()
                } else {
                    let old = inner.elevation.take();
                    inner.elevation =
                        provider.map(|p| Binding::new(p, ResourceType::ElevationData));
                    old.into_iter().map(|b| b.collection).collect()
                }
            }
            ProviderSet::RasterLayers(layers) => {
                let mut pool: Vec<Binding> = inner.raster.iter_mut().filter_map(Option::take).collect();
                for (slot, provider) in layers.into_iter().enumerate() {
                    let Some(provider) = provider else {
                        continue;
                    };
                    let id = ProviderId::of(&provider);
                    inner.raster[slot] = Some(match pool.iter().position(|b| b.provider.id() == id) {
                        Some(index) => pool.swap_remove(index),
                        None => Binding::new(BoundProvider::Tile(provider), ResourceType::RasterMap),
                    });
                }
                pool.into_iter().map(|b| b.collection).collect()
            }
            ProviderSet::Symbols(providers) => {
                let mut kept = Vec::with_capacity(providers.len());
                let mut pool = std::mem::take(&mut inner.symbols);
                for provider in providers {
                    let id = ProviderId::of(&provider);
                    if kept.iter().any(|b: &Binding| b.provider.id() == id) {
                        continue;
                    }
                    kept.push(match pool.iter().position(|b| b.provider.id() == id) {
                        Some(index) => pool.swap_remove(index),
                        None => Binding::new(BoundProvider::Symbols(provider), ResourceType::Symbols),
                    });
                }
                inner.symbols = kept;
                pool.into_iter().map(|b| b.collection).collect()
            }
        };

        debug!(removed = removed.len(), "Reconciled provider bindings");
        removed
    }

    /// Collection bound to `provider` for `resource_type`.
    pub fn collection(
        &self,
        resource_type: ResourceType,
        provider: ProviderId,
    ) -> Option<Arc<TiledCollection>> {
        self.inner
            .read()
            .iter()
            .find(|b| b.collection.resource_type() == resource_type && b.provider.id() == provider)
            .map(|b| Arc::clone(&b.collection))
    }

    /// Collection in raster layer slot `index`.
    pub fn raster_layer(&self, index: usize) -> Option<Arc<TiledCollection>> {
        self.inner
            .read()
            .raster
            .get(index)
            .and_then(Option::as_ref)
            .map(|b| Arc::clone(&b.collection))
    }

    /// Provider currently filling collection `id`.
    pub fn provider_for(&self, id: CollectionId) -> Option<BoundProvider> {
        self.inner
            .read()
            .iter()
            .find(|b| b.collection.id() == id)
            .map(|b| b.provider.clone())
    }

    pub fn is_bound(&self, id: CollectionId) -> bool {
        self.inner.read().iter().any(|b| b.collection.id() == id)
    }

    /// Every active binding, elevation first, then raster slots, then symbols.
    pub fn bindings(&self) -> Vec<Binding> {
        self.inner.read().iter().cloned().collect()
    }

    pub fn collections(&self) -> Vec<Arc<TiledCollection>> {
        self.inner
            .read()
            .iter()
            .map(|b| Arc::clone(&b.collection))
            .collect()
    }

    pub fn collections_of(&self, resource_type: ResourceType) -> Vec<Arc<TiledCollection>> {
        self.inner
            .read()
            .iter()
            .filter(|b| b.collection.resource_type() == resource_type)
            .map(|b| Arc::clone(&b.collection))
            .collect()
    }
}
