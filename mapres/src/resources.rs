//! Renderer-facing resource manager.
//!
//! [`MapResources`] ties the pieces together:
//!
//! ```text
//!  render thread                         manager runtime
//!  ─────────────                         ───────────────
//!  set_providers ──► BindingRegistry
//!  set_active_zone ─────────────────────► SchedulerDaemon ──► FetchPool
//!                                              │                 │
//!                                              ▼                 ▼
//!                                        TiledCollection ◄── providers
//!  sync_gpu ──► GpuSyncEngine ──► GraphicsDevice
//!  tile_for_draw / symbols_snapshot
//! ```
//!
//! The thread that builds the manager owns the graphics device. Calls that
//! touch the device from any other thread are invariant violations and do
//! nothing; [`MapResources::claim_gpu_thread`] hands ownership to a dedicated
//! GPU worker thread.

use crate::bindings::{BindingRegistry, ProviderSet};
use crate::config::ResourcesConfig;
use crate::error::ResourcesError;
use crate::gpu::GraphicsDevice;
use crate::hooks::{NoopHooks, RendererHooks};
use crate::provider::ProviderId;
use crate::resource::{ResourceState, TiledCollection};
use crate::scheduler::{Activity, FetchPool, RequestScheduler, SchedulerDaemon, ZoneUpdate};
use crate::stub::StubTextures;
use crate::symbols::{PublishedSymbol, PublishedSymbols};
use crate::sync::{GpuSyncEngine, SyncReport};
use crate::tile::{ActiveZone, ResourceType, TileId, ZoomLevel};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the renderer should draw for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTile {
    /// The tile's own texture
    Uploaded(u64),
    /// Placeholder for a tile still on its way
    Processing(u64),
    /// Placeholder for a tile the provider has no data for
    Unavailable(u64),
}

impl DrawTile {
    pub fn texture(self) -> u64 {
        match self {
            DrawTile::Uploaded(t) | DrawTile::Processing(t) | DrawTile::Unavailable(t) => t,
        }
    }

    pub fn is_uploaded(self) -> bool {
        matches!(self, DrawTile::Uploaded(_))
    }
}

/// Snapshot of manager state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcesStats {
    /// Entry count per [`ResourceState`], indexed by discriminant
    pub states: [usize; ResourceState::COUNT],
    pub collections: usize,
    pub gpu_resident: usize,
    pub fetches_in_flight: usize,
    pub peak_fetches_in_flight: usize,
    pub fetches_started: u64,
    pub published_symbols: usize,
}

impl ResourcesStats {
    pub fn in_state(&self, state: ResourceState) -> usize {
        self.states[state as usize]
    }

    pub fn entries(&self) -> usize {
        self.states.iter().sum()
    }
}

/// Builder for [`MapResources`].
pub struct MapResourcesBuilder {
    device: Arc<dyn GraphicsDevice>,
    config: ResourcesConfig,
    hooks: Arc<dyn RendererHooks>,
}

impl MapResourcesBuilder {
    pub fn config(mut self, config: ResourcesConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn RendererHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Upload the placeholders, start the runtime and the scheduler daemon.
    ///
    /// The calling thread becomes the GPU owner.
    pub fn build(self) -> Result<MapResources, ResourcesError> {
        let Self {
            device,
            config,
            hooks,
        } = self;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.fetch_workers + 2)
            .thread_name("mapres-worker")
            .enable_all()
            .build()
            .map_err(|e| ResourcesError::RuntimeCreation(e.to_string()))?;

        let stubs = StubTextures::upload(device.as_ref(), config.stub_tile_size)
            .map_err(ResourcesError::StubUpload)?;

        let bindings = Arc::new(BindingRegistry::new());
        let activity = Arc::new(Activity::new());
        let pass_lock = Arc::new(Mutex::new(()));
        let pool = FetchPool::new(
            runtime.handle().clone(),
            config.fetch_workers,
            Arc::clone(&activity),
        );
        let scheduler = Arc::new(RequestScheduler::new(
            Arc::clone(&bindings),
            pool,
            Arc::clone(&hooks),
            Arc::clone(&pass_lock),
        ));

        let (zones, zone_rx) = watch::channel(ZoneUpdate::default());
        let shutdown = CancellationToken::new();
        let daemon = SchedulerDaemon::new(Arc::clone(&scheduler), zone_rx, Arc::clone(&activity));
        runtime.spawn(daemon.run(shutdown.clone()));

        let published = Arc::new(PublishedSymbols::new());
        let engine = GpuSyncEngine::new(
            Arc::clone(&device),
            Arc::clone(&published),
            config.upload_from_worker_thread,
        );

        info!(
            fetch_workers = config.fetch_workers,
            upload_from_worker_thread = config.upload_from_worker_thread,
            stub_tile_size = config.stub_tile_size,
            "Map resources started"
        );

        Ok(MapResources {
            config,
            bindings,
            scheduler,
            engine,
            published,
            pass_lock,
            zones,
            activity,
            gpu_thread: Mutex::new(thread::current().id()),
            invalidated: AtomicU32::new(0),
            stubs: Mutex::new(stubs),
            hooks,
            shutdown,
            runtime: Some(runtime),
        })
    }
}

/// Tiled resource cache and GPU upload manager.
pub struct MapResources {
    config: ResourcesConfig,
    bindings: Arc<BindingRegistry>,
    scheduler: Arc<RequestScheduler>,
    engine: GpuSyncEngine,
    published: Arc<PublishedSymbols>,
    pass_lock: Arc<Mutex<()>>,
    zones: watch::Sender<ZoneUpdate>,
    activity: Arc<Activity>,
    gpu_thread: Mutex<ThreadId>,
    invalidated: AtomicU32,
    stubs: Mutex<StubTextures>,
    hooks: Arc<dyn RendererHooks>,
    shutdown: CancellationToken,
    runtime: Option<Runtime>,
}

impl MapResources {
    pub fn builder(device: Arc<dyn GraphicsDevice>) -> MapResourcesBuilder {
        MapResourcesBuilder {
            device,
            config: ResourcesConfig::default(),
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn config(&self) -> &ResourcesConfig {
        &self.config
    }

    // =========================================================================
    // GPU thread ownership
    // =========================================================================

    /// Make the calling thread the GPU owner.
    pub fn claim_gpu_thread(&self) {
        let mut owner = self.gpu_thread.lock();
        let current = thread::current().id();
        let previous = std::mem::replace(&mut *owner, current);
        if previous != current {
            debug!(from = ?previous, to = ?current, "GPU thread ownership moved");
        }
    }

    pub fn is_gpu_thread(&self) -> bool {
        *self.gpu_thread.lock() == thread::current().id()
    }

    fn check_gpu_thread(&self, operation: &str) -> bool {
        if self.is_gpu_thread() {
            return true;
        }
        crate::invariant_violation!(
            "{} called from {:?}, which does not own the GPU",
            operation,
            thread::current().id()
        );
        false
    }

    // =========================================================================
    // Providers and active zone
    // =========================================================================

    /// Replace the providers of one resource type.
    ///
    /// Collections of providers that went away are released on the spot, so
    /// this must run on the GPU thread.
    pub fn set_providers(&self, providers: ProviderSet) {
        if !self.check_gpu_thread("set_providers") {
            return;
        }
        let resource_type = providers.resource_type();
        let released = {
            let _pass = self.pass_lock.lock();
            let removed = self.bindings.reconcile(providers);
            for collection in &removed {
                self.engine.release_all(collection);
            }
            removed.len()
        };

        info!(kind = %resource_type, released, "Providers updated");
        self.rewake();
        self.hooks.invalidate_frame();
    }

    /// Replace the active zone. Returns at once; the scheduler picks the zone
    /// up in the background.
    pub fn set_active_zone(&self, tiles: impl IntoIterator<Item = TileId>, zoom: ZoomLevel) {
        let zone = Arc::new(ActiveZone::new(tiles, zoom));
        self.zones.send_modify(|update| {
            update.zone = zone;
            update.generation += 1;
        });
    }

    /// Current active zone.
    pub fn active_zone(&self) -> Arc<ActiveZone> {
        Arc::clone(&self.zones.borrow().zone)
    }

    /// Run the scheduler again on the current zone.
    fn rewake(&self) {
        self.zones.send_modify(|update| update.generation += 1);
    }

    /// Block until the scheduler has processed the latest zone and no fetch is
    /// in flight. Returns false on timeout.
    pub fn wait_for_requests(&self, timeout: Duration) -> bool {
        let generation = self.zones.borrow().generation;
        self.activity.wait_idle(generation, timeout)
    }

    // =========================================================================
    // GPU sync
    // =========================================================================

    /// Flag every collection of `resource_type` for a full release on the next
    /// [`sync_gpu`](Self::sync_gpu).
    pub fn invalidate(&self, resource_type: ResourceType) {
        self.invalidated
            .fetch_or(resource_type.mask_bit(), Ordering::AcqRel);
        self.hooks.request_upload();
    }

    /// Apply pending invalidations, unload evicted entries and upload up to
    /// `limit` ready ones (0 = no limit).
    pub fn sync_gpu(&self, limit: u32) -> SyncReport {
        if !self.check_gpu_thread("sync_gpu") {
            return SyncReport::default();
        }

        let invalidated = self.apply_invalidations();
        let report = self.engine.sync(&self.bindings.collections(), limit);

        if invalidated || report.changed() {
            self.hooks.invalidate_frame();
        }
        report
    }

    fn apply_invalidations(&self) -> bool {
        let mask = self.invalidated.swap(0, Ordering::AcqRel);
        if mask == 0 {
            return false;
        }

        {
            let _pass = self.pass_lock.lock();
            for resource_type in ResourceType::ALL {
                if mask & resource_type.mask_bit() == 0 {
                    continue;
                }
                for collection in self.bindings.collections_of(resource_type) {
                    self.engine.release_all(&collection);
                }
                debug!(kind = %resource_type, "Invalidated resources released");
            }
        }
        self.rewake();
        true
    }

    // =========================================================================
    // Draw-time lookups
    // =========================================================================

    /// Collection bound to `provider` for `resource_type`.
    pub fn collection(
        &self,
        resource_type: ResourceType,
        provider: ProviderId,
    ) -> Option<Arc<TiledCollection>> {
        self.bindings.collection(resource_type, provider)
    }

    /// Collection of raster layer slot `index`.
    pub fn raster_layer(&self, index: usize) -> Option<Arc<TiledCollection>> {
        self.bindings.raster_layer(index)
    }

    /// Every bound collection.
    pub fn collections(&self) -> Vec<Arc<TiledCollection>> {
        self.bindings.collections()
    }

    /// Texture to draw for `tile` from a raster or elevation collection.
    ///
    /// Symbols are drawn from [`symbols_snapshot`](Self::symbols_snapshot)
    /// instead; their entries always map to the processing placeholder here.
    pub fn tile_for_draw(
        &self,
        collection: &TiledCollection,
        tile: TileId,
        zoom: ZoomLevel,
    ) -> DrawTile {
        let stubs = self.stubs.lock();
        let Some(entry) = collection.obtain_entry(tile, zoom) else {
            return DrawTile::Processing(stubs.processing());
        };

        if entry.set_state_if(ResourceState::Uploaded, ResourceState::IsBeingUsed) {
            let texture = entry.texture();
            entry.set_state_if(ResourceState::IsBeingUsed, ResourceState::Uploaded);
            if let Some(texture) = texture {
                return DrawTile::Uploaded(texture);
            }
        }

        match entry.state() {
            ResourceState::Unavailable => DrawTile::Unavailable(stubs.unavailable()),
            _ => DrawTile::Processing(stubs.processing()),
        }
    }

    /// Uploaded symbols in draw order.
    pub fn symbols_snapshot(&self) -> Vec<PublishedSymbol> {
        self.published.snapshot()
    }

    pub fn symbols_count(&self) -> usize {
        self.published.count()
    }

    pub fn stats(&self) -> ResourcesStats {
        let collections = self.bindings.collections();
        let mut stats = ResourcesStats {
            collections: collections.len(),
            fetches_in_flight: self.activity.in_flight(),
            peak_fetches_in_flight: self.activity.peak_in_flight(),
            fetches_started: self.activity.started(),
            published_symbols: self.published.count(),
            ..Default::default()
        };
        for collection in &collections {
            collection.accumulate_states(&mut stats.states);
            stats.gpu_resident += collection.count_gpu_resident();
        }
        stats
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop the scheduler, release everything on the device and shut the
    /// runtime down.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        let started = Instant::now();
        let timeout = self.config.shutdown_timeout;

        self.shutdown.cancel();
        self.scheduler.halt();

        if !self.is_gpu_thread() {
            warn!("Map resources torn down off the GPU thread");
        }
        let collections = self.bindings.collections();
        {
            let _pass = self.pass_lock.lock();
            for collection in &collections {
                self.engine.release_all(collection);
            }
        }

        if !self.activity.wait_idle(0, timeout) {
            warn!(
                in_flight = self.activity.in_flight(),
                timeout_ms = timeout.as_millis() as u64,
                "Fetches still running at shutdown"
            );
        }
        self.stubs.lock().release(self.engine.device().as_ref());

        let remaining = timeout.saturating_sub(started.elapsed());
        if tokio::runtime::Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(remaining);
        }

        info!(
            collections = collections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Map resources shut down"
        );
    }
}

impl Drop for MapResources {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::gpu::HeadlessDevice;
    use crate::provider::{TileData, TileProvider};

    struct Checker;

    impl TileProvider for Checker {
        fn fetch_tile(&self, tile: TileId, _: ZoomLevel) -> Result<Option<TileData>, ProviderError> {
            if (tile.x + tile.y) % 2 == 0 {
                Ok(Some(TileData::new(2, 2, false, vec![1u8; 16])))
            } else {
                Ok(None)
            }
        }
    }

    fn build(device: &Arc<HeadlessDevice>) -> MapResources {
        MapResources::builder(device.clone())
            .config(ResourcesConfig::default().with_fetch_workers(2).with_stub_tile_size(4))
            .build()
            .unwrap()
    }

    fn zoom() -> ZoomLevel {
        ZoomLevel::new(5).unwrap()
    }

    #[test]
    fn test_build_uploads_stubs_and_shutdown_releases_them() {
        let device = Arc::new(HeadlessDevice::new());
        let resources = build(&device);
        assert_eq!(device.live_allocations(), 2);

        resources.shutdown();
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_draw_lookup_follows_entry_state() {
        let device = Arc::new(HeadlessDevice::new());
        let resources = build(&device);
        let provider: Arc<dyn TileProvider> = Arc::new(Checker);
        resources.set_providers(ProviderSet::Elevation(Some(provider.clone())));

        resources.set_active_zone([TileId::new(0, 0), TileId::new(0, 1)], zoom());
        assert!(resources.wait_for_requests(Duration::from_secs(10)));

        let collection = resources
            .collection(ResourceType::ElevationData, ProviderId::of(&provider))
            .unwrap();
        let processing = resources.stubs.lock().processing();
        let unavailable = resources.stubs.lock().unavailable();
        let stubs = (processing, unavailable);

        assert_eq!(
            resources.tile_for_draw(&collection, TileId::new(0, 0), zoom()),
            DrawTile::Processing(stubs.0)
        );
        assert_eq!(
            resources.tile_for_draw(&collection, TileId::new(0, 1), zoom()),
            DrawTile::Unavailable(stubs.1)
        );
        assert_eq!(
            resources.tile_for_draw(&collection, TileId::new(7, 7), zoom()),
            DrawTile::Processing(stubs.0)
        );

        let report = resources.sync_gpu(0);
        assert_eq!(report.uploaded, 1);
        let drawn = resources.tile_for_draw(&collection, TileId::new(0, 0), zoom());
        assert!(drawn.is_uploaded());
        assert!(device.is_live(drawn.texture()));

        let entry = collection.obtain_entry(TileId::new(0, 0), zoom()).unwrap();
        assert_eq!(entry.state(), ResourceState::Uploaded);

        resources.shutdown();
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_stats_counts_states() {
        let device = Arc::new(HeadlessDevice::new());
        let resources = build(&device);
        resources.set_providers(ProviderSet::Elevation(Some(Arc::new(Checker))));
        resources.set_active_zone([TileId::new(0, 0), TileId::new(1, 0)], zoom());
        assert!(resources.wait_for_requests(Duration::from_secs(10)));

        let stats = resources.stats();
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.entries(), 2);
        assert_eq!(stats.in_state(ResourceState::Ready), 1);
        assert_eq!(stats.in_state(ResourceState::Unavailable), 1);
        assert_eq!(stats.fetches_in_flight, 0);
        assert_eq!(stats.fetches_started, 2);
    }

    #[test]
    fn test_claim_gpu_thread_moves_ownership() {
        let device = Arc::new(HeadlessDevice::new());
        let resources = Arc::new(build(&device));
        assert!(resources.is_gpu_thread());

        let worker = Arc::clone(&resources);
        thread::spawn(move || {
            worker.claim_gpu_thread();
            assert!(worker.is_gpu_thread());
            worker.sync_gpu(0);
        })
        .join()
        .unwrap();

        assert!(!resources.is_gpu_thread());
        resources.claim_gpu_thread();
        assert!(resources.is_gpu_thread());
    }
}
