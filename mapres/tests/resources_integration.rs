//! Integration tests for MapResources.
//!
//! These tests drive the full stack through the public API:
//! - active zone → scheduler daemon → fetch pool → providers
//! - sync_gpu → headless device uploads and unloads
//! - shutdown → no device allocation left behind
//!
//! Run with: `cargo test --test resources_integration`

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use mapres::bindings::ProviderSet;
use mapres::config::ResourcesConfig;
use mapres::error::ProviderError;
use mapres::gpu::HeadlessDevice;
use mapres::hooks::RendererHooks;
use mapres::provider::{
    MapSymbol, ProviderId, SourceObject, SymbolProvider, SymbolsGroup, SymbolsTile, TileData,
    TileProvider,
};
use mapres::resource::{ResourceState, TiledCollection};
use mapres::tile::{AreaI, ResourceType, TileId, ZoomLevel};
use mapres::{DrawTile, MapResources};

const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// Helper Functions
// ============================================================================

/// Counts events logged on the invariant target, across all tests.
struct InvariantCounter;

impl<S: tracing::Subscriber> Layer<S> for InvariantCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() == "mapres::invariant" {
            invariant_violations().fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn invariant_violations() -> &'static AtomicUsize {
    static COUNT: OnceLock<AtomicUsize> = OnceLock::new();
    COUNT.get_or_init(|| AtomicUsize::new(0))
}

fn watch_invariants() {
    let _ = tracing_subscriber::registry().with(InvariantCounter).try_init();
}

fn zoom(level: u8) -> ZoomLevel {
    ZoomLevel::new(level).unwrap()
}

fn build(device: &Arc<HeadlessDevice>) -> MapResources {
    watch_invariants();
    MapResources::builder(device.clone())
        .config(
            ResourcesConfig::default()
                .with_fetch_workers(4)
                .with_stub_tile_size(4),
        )
        .build()
        .unwrap()
}

/// Tile provider that records concurrency per tile.
#[derive(Default)]
struct Tracking {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: Mutex<HashMap<TileId, usize>>,
    max_per_tile: AtomicUsize,
    fail_first: bool,
    failed: Mutex<Vec<TileId>>,
}

impl Tracking {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    fn flaky() -> Arc<Self> {
        Arc::new(Self {
            fail_first: true,
            ..Default::default()
        })
    }
}

impl TileProvider for Tracking {
    fn fetch_tile(&self, tile: TileId, _: ZoomLevel) -> Result<Option<TileData>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let now = in_flight.entry(tile).or_insert(0);
            *now += 1;
            self.max_per_tile.fetch_max(*now, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        *self.in_flight.lock().unwrap().get_mut(&tile).unwrap() -= 1;

        if self.fail_first {
            let mut failed = self.failed.lock().unwrap();
            if !failed.contains(&tile) {
                failed.push(tile);
                return Err(ProviderError::Io("connection reset".into()));
            }
        }
        Ok(Some(TileData::new(2, 2, false, vec![9u8; 16])))
    }
}

/// Symbol provider with one object spanning tiles x=0 and x=1, plus one
/// object fully inside each tile.
struct Landmarks;

impl Landmarks {
    const SHARED: u64 = 100;
}

impl SymbolProvider for Landmarks {
    fn fetch_symbols(
        &self,
        tile: TileId,
        zoom: ZoomLevel,
        filter: &mut dyn FnMut(&SourceObject) -> bool,
    ) -> Result<Option<SymbolsTile>, ProviderError> {
        let area = AreaI::for_tile(tile, zoom);
        let tile_span = area.right - area.left + 1;
        let objects = [
            SourceObject {
                id: Landmarks::SHARED,
                bbox31: AreaI::new(area.top, 0, area.top + 10, tile_span + 10),
            },
            SourceObject {
                id: 1 + tile.x as u64,
                bbox31: AreaI::new(area.top, area.left, area.top + 4, area.left + 4),
            },
        ];

        let mut groups = Vec::new();
        for object in objects {
            if filter(&object) {
                groups.push(SymbolsGroup::new(
                    object,
                    vec![MapSymbol::new(object.id as i32, (area.left, area.top), vec![1u8; 8])],
                ));
            }
        }
        Ok(Some(SymbolsTile::new(groups)))
    }

    fn can_symbols_be_shared(&self, _object: &SourceObject) -> bool {
        true
    }
}

#[derive(Default)]
struct CountingHooks {
    upload_requests: AtomicUsize,
    invalidations: AtomicUsize,
}

impl RendererHooks for CountingHooks {
    fn request_upload(&self) {
        self.upload_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate_frame(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

fn base_layer(resources: &MapResources, provider: &Arc<Tracking>) -> Arc<TiledCollection> {
    let provider: Arc<dyn TileProvider> = provider.clone();
    resources.set_providers(ProviderSet::base_layer(provider));
    resources.raster_layer(0).unwrap()
}

fn state_of(collection: &TiledCollection, tile: TileId, z: ZoomLevel) -> Option<ResourceState> {
    collection.obtain_entry(tile, z).map(|entry| entry.state())
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Request, upload, evict, unload and remove one tile.
#[test]
fn test_single_tile_full_lifecycle() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let collection = base_layer(&resources, &Tracking::new());
    let tile = TileId::new(2, 3);

    resources.set_active_zone([tile], zoom(5));
    assert!(resources.wait_for_requests(WAIT));
    assert_eq!(state_of(&collection, tile, zoom(5)), Some(ResourceState::Ready));

    let report = resources.sync_gpu(0);
    assert_eq!(report.uploaded, 1);
    assert!(!report.more_available);
    assert_eq!(state_of(&collection, tile, zoom(5)), Some(ResourceState::Uploaded));

    resources.set_active_zone([], zoom(5));
    assert!(resources.wait_for_requests(WAIT));
    assert_eq!(
        state_of(&collection, tile, zoom(5)),
        Some(ResourceState::UnloadPending)
    );

    let report = resources.sync_gpu(0);
    assert_eq!(report.unloaded, 1);
    assert_eq!(state_of(&collection, tile, zoom(5)), Some(ResourceState::Unloaded));

    resources.set_active_zone([], zoom(5));
    assert!(resources.wait_for_requests(WAIT));
    assert!(collection.is_empty());

    resources.shutdown();
    assert_eq!(device.live_allocations(), 0);
}

/// A fetched tile that leaves the zone before upload is removed cleanly.
#[test]
fn test_evict_before_upload_leaves_nothing_behind() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let collection = base_layer(&resources, &Tracking::new());

    resources.set_active_zone([TileId::new(0, 0)], zoom(4));
    assert!(resources.wait_for_requests(WAIT));
    let entry = collection.obtain_entry(TileId::new(0, 0), zoom(4)).unwrap();
    assert_eq!(entry.state(), ResourceState::Ready);

    resources.set_active_zone([], zoom(4));
    assert!(resources.wait_for_requests(WAIT));

    assert!(collection.is_empty());
    assert_eq!(entry.state(), ResourceState::JustBeforeDeath);
    assert!(!entry.has_request());
    assert_eq!(device.stats().tile_uploads, 2, "only the placeholders were uploaded");
}

/// A provider error discards the entry; the next pass asks again.
#[test]
fn test_failed_fetch_is_retried_on_next_pass() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let provider = Tracking::flaky();
    let collection = base_layer(&resources, &provider);
    let tile = TileId::new(5, 5);

    resources.set_active_zone([tile], zoom(6));
    assert!(resources.wait_for_requests(WAIT));
    assert!(collection.is_empty());

    resources.set_active_zone([tile], zoom(6));
    assert!(resources.wait_for_requests(WAIT));
    assert_eq!(state_of(&collection, tile, zoom(6)), Some(ResourceState::Ready));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// GPU sync
// ============================================================================

#[test]
fn test_sync_gpu_respects_upload_limit() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    base_layer(&resources, &Tracking::new());

    resources.set_active_zone((0..6).map(|x| TileId::new(x, 0)), zoom(8));
    assert!(resources.wait_for_requests(WAIT));

    let first = resources.sync_gpu(4);
    assert_eq!((first.uploaded, first.more_available), (4, true));
    let second = resources.sync_gpu(4);
    assert_eq!((second.uploaded, second.more_available), (2, false));
    let third = resources.sync_gpu(4);
    assert_eq!((third.uploaded, third.more_available), (0, false));

    assert_eq!(resources.stats().in_state(ResourceState::Uploaded), 6);
}

#[test]
fn test_failed_upload_is_retried_next_sync() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let collection = base_layer(&resources, &Tracking::new());
    let tile = TileId::new(1, 1);

    resources.set_active_zone([tile], zoom(3));
    assert!(resources.wait_for_requests(WAIT));

    device.fail_next_uploads(1);
    let report = resources.sync_gpu(0);
    assert_eq!(report.uploaded, 0);
    assert!(report.more_available);
    assert_eq!(state_of(&collection, tile, zoom(3)), Some(ResourceState::Ready));
    assert!(!resources.tile_for_draw(&collection, tile, zoom(3)).is_uploaded());

    assert_eq!(resources.sync_gpu(0).uploaded, 1);
    assert!(resources.tile_for_draw(&collection, tile, zoom(3)).is_uploaded());
}

#[test]
fn test_invalidate_releases_and_refetches() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let provider = Tracking::new();
    let collection = base_layer(&resources, &provider);
    let tile = TileId::new(3, 3);

    resources.set_active_zone([tile], zoom(7));
    assert!(resources.wait_for_requests(WAIT));
    resources.sync_gpu(0);
    let before = resources.tile_for_draw(&collection, tile, zoom(7));
    assert!(before.is_uploaded());

    resources.invalidate(ResourceType::RasterMap);
    // The refetch may already be ready within the same sync
    let first = resources.sync_gpu(0).uploaded;
    assert!(!device.is_live(before.texture()));

    assert!(resources.wait_for_requests(WAIT));
    let second = resources.sync_gpu(0).uploaded;
    assert_eq!(first + second, 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_hooks_are_notified() {
    let device = Arc::new(HeadlessDevice::new());
    let hooks = Arc::new(CountingHooks::default());
    let resources = MapResources::builder(device.clone())
        .config(ResourcesConfig::default().with_stub_tile_size(4))
        .hooks(hooks.clone())
        .build()
        .unwrap();
    base_layer(&resources, &Tracking::new());

    resources.set_active_zone([TileId::new(0, 0), TileId::new(1, 0)], zoom(2));
    assert!(resources.wait_for_requests(WAIT));
    assert_eq!(hooks.upload_requests.load(Ordering::SeqCst), 2);

    let invalidations = hooks.invalidations.load(Ordering::SeqCst);
    resources.sync_gpu(0);
    assert_eq!(hooks.invalidations.load(Ordering::SeqCst), invalidations + 1);
}

// ============================================================================
// Bindings
// ============================================================================

#[test]
fn test_removing_provider_releases_its_collection() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let provider: Arc<dyn TileProvider> = Tracking::new();
    resources.set_providers(ProviderSet::Elevation(Some(provider.clone())));

    resources.set_active_zone((0..3).map(|y| TileId::new(0, y)), zoom(9));
    assert!(resources.wait_for_requests(WAIT));
    resources.sync_gpu(0);
    assert_eq!(device.live_allocations(), 2 + 3);

    let collection = resources
        .collection(ResourceType::ElevationData, ProviderId::of(&provider))
        .unwrap();
    resources.set_providers(ProviderSet::Elevation(None));

    assert!(collection.is_empty());
    assert_eq!(device.live_allocations(), 2);
    assert!(resources
        .collection(ResourceType::ElevationData, ProviderId::of(&provider))
        .is_none());
}

#[test]
fn test_raster_layer_move_keeps_collection() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let a: Arc<dyn TileProvider> = Tracking::new();
    let b: Arc<dyn TileProvider> = Tracking::new();

    resources.set_providers(ProviderSet::RasterLayers([
        Some(a.clone()),
        Some(b.clone()),
        None,
        None,
    ]));
    resources.set_active_zone([TileId::new(0, 0)], zoom(1));
    assert!(resources.wait_for_requests(WAIT));
    resources.sync_gpu(0);
    let b_collection = resources.raster_layer(1).unwrap();

    resources.set_providers(ProviderSet::RasterLayers([Some(b.clone()), None, None, None]));

    let moved = resources.raster_layer(0).unwrap();
    assert_eq!(moved.id(), b_collection.id());
    assert_eq!(
        state_of(&moved, TileId::new(0, 0), zoom(1)),
        Some(ResourceState::Uploaded)
    );
    assert!(resources.raster_layer(1).is_none());
    assert_eq!(device.live_allocations(), 2 + 1);
}

// ============================================================================
// Symbols
// ============================================================================

/// Two tiles sharing an object upload its symbol once; it survives until the
/// last tile lets go.
#[test]
fn test_shared_symbols_upload_once() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let provider: Arc<dyn SymbolProvider> = Arc::new(Landmarks);
    resources.set_providers(ProviderSet::Symbols(vec![provider.clone()]));
    let collection = resources
        .collection(ResourceType::Symbols, ProviderId::of(&provider))
        .unwrap();
    let caches = collection.symbol_caches().unwrap().clone();
    let z = zoom(3);

    resources.set_active_zone([TileId::new(0, 0), TileId::new(1, 0)], z);
    assert!(resources.wait_for_requests(WAIT));
    assert_eq!(resources.sync_gpu(0).uploaded, 2);

    // One shared symbol plus one unique symbol per tile
    assert_eq!(device.stats().symbol_uploads, 3);
    assert_eq!(caches.gpu.live_count(), 1);
    assert_eq!(resources.symbols_count(), 3);
    let snapshot = resources.symbols_snapshot();
    assert!(snapshot.windows(2).all(|w| w[0].order <= w[1].order));
    assert_eq!(
        snapshot
            .iter()
            .filter(|s| s.object_id == Landmarks::SHARED)
            .count(),
        1
    );

    // Drop the first tile: the shared symbol stays
    resources.set_active_zone([TileId::new(1, 0)], z);
    assert!(resources.wait_for_requests(WAIT));
    assert_eq!(resources.sync_gpu(0).unloaded, 1);
    assert_eq!(caches.gpu.live_count(), 1);
    assert_eq!(resources.symbols_count(), 2);

    // Drop the second tile: now it goes
    resources.set_active_zone([], z);
    assert!(resources.wait_for_requests(WAIT));
    assert_eq!(resources.sync_gpu(0).unloaded, 1);
    assert_eq!(caches.gpu.live_count(), 0);
    assert_eq!(resources.symbols_count(), 0);
    assert_eq!(device.stats().symbol_uploads, 3);

    resources.set_active_zone([], z);
    assert!(resources.wait_for_requests(WAIT));
    assert!(collection.is_empty());
    assert!(caches.sharing.is_empty());
}

// ============================================================================
// Churn
// ============================================================================

/// Random zone churn with a slow provider: never two fetches for one tile at
/// once, no invariant violations, nothing leaked.
#[test]
fn test_zone_churn_keeps_invariants() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let provider = Tracking::with_delay(Duration::from_millis(2));
    let collection = base_layer(&resources, &provider);
    let violations_before = invariant_violations().load(Ordering::SeqCst);

    let mut rng = StdRng::seed_from_u64(0x6d61_7072);
    let mut seen = Vec::new();
    for frame in 0..200 {
        let tiles: Vec<TileId> = (0..16)
            .filter(|_| rng.random_bool(0.5))
            .map(|i| TileId::new(i % 4, i / 4))
            .collect();
        resources.set_active_zone(tiles, zoom(10));
        resources.sync_gpu(rng.random_range(0..4));

        if frame % 20 == 0 {
            seen.extend(collection.obtain_entries(|e, _| e.state().is_gpu_resident()));
        }
        if rng.random_bool(0.1) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    resources.set_active_zone([], zoom(10));
    assert!(resources.wait_for_requests(WAIT));
    resources.sync_gpu(0);
    resources.set_active_zone([], zoom(10));
    assert!(resources.wait_for_requests(WAIT));

    assert!(provider.max_per_tile.load(Ordering::SeqCst) <= 1);
    assert!(collection.is_empty());
    for entry in &seen {
        assert!(!entry.state().is_gpu_resident());
    }

    resources.shutdown();
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.stats().double_releases, 0);
    assert_eq!(invariant_violations().load(Ordering::SeqCst), violations_before);
}

/// Shutdown in the middle of fetching and uploading releases everything.
#[test]
fn test_shutdown_mid_flight_releases_everything() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    base_layer(&resources, &Tracking::with_delay(Duration::from_millis(5)));

    resources.set_active_zone((0..8).map(|x| TileId::new(x, 1)), zoom(12));
    std::thread::sleep(Duration::from_millis(8));
    resources.sync_gpu(0);

    resources.shutdown();
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn test_draw_falls_back_to_stubs() {
    let device = Arc::new(HeadlessDevice::new());
    let resources = build(&device);
    let collection = base_layer(&resources, &Tracking::new());

    let drawn = resources.tile_for_draw(&collection, TileId::new(9, 9), zoom(9));
    assert!(matches!(drawn, DrawTile::Processing(_)));
    assert!(device.is_live(drawn.texture()));
}
