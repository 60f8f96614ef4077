//! Simulate command - pan a camera across synthetic providers.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Args;
use mapres::bindings::ProviderSet;
use mapres::gpu::HeadlessDevice;
use mapres::provider::{SymbolProvider, TileProvider};
use mapres::resource::ResourceState;
use mapres::tile::{TileId, ZoomLevel};
use mapres::{DrawTile, MapResources, SyncReport};
use tracing::info;

use super::synthetic::{FlatElevation, GradientRaster, Labels};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the simulate command.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of frames to render
    #[arg(long, default_value = "120")]
    pub frames: u32,

    /// Zoom level of the active zone (1-24)
    #[arg(long, default_value = "12")]
    pub zoom: u8,

    /// Tiles visible around the camera in each direction
    #[arg(long, default_value = "2")]
    pub radius: i32,

    /// Frames the camera stays on a tile before moving on
    #[arg(long, default_value = "4")]
    pub frames_per_tile: u32,

    /// Uploads per frame, 0 for no limit (default: from config)
    #[arg(long)]
    pub upload_limit: Option<u32>,

    /// Concurrent provider fetches (default: from config)
    #[arg(long)]
    pub fetch_workers: Option<usize>,

    /// Simulated provider latency in milliseconds
    #[arg(long, default_value = "3")]
    pub latency_ms: u64,

    /// Frame duration in milliseconds
    #[arg(long, default_value = "16")]
    pub frame_ms: u64,

    /// Also bind a symbol provider
    #[arg(long)]
    pub symbols: bool,
}

/// Totals accumulated over a run.
#[derive(Debug, Default)]
struct Totals {
    uploaded: u64,
    unloaded: u64,
    saturated_frames: u32,
    drawn: u64,
    placeholders: u64,
    unavailable: u64,
}

impl Totals {
    fn add_sync(&mut self, report: SyncReport) {
        self.uploaded += report.uploaded as u64;
        self.unloaded += report.unloaded as u64;
        if report.more_available {
            self.saturated_frames += 1;
        }
    }

    fn add_draw(&mut self, tile: DrawTile) {
        match tile {
            DrawTile::Uploaded(_) => self.drawn += 1,
            DrawTile::Processing(_) => self.placeholders += 1,
            DrawTile::Unavailable(_) => self.unavailable += 1,
        }
    }
}

/// Run the simulate command.
pub fn run(config_path: Option<&Path>, args: SimulateArgs) -> Result<(), CliError> {
    if !(1..=24).contains(&args.zoom) {
        return Err(CliError::InvalidArgument(format!(
            "zoom must be between 1 and 24, got {}",
            args.zoom
        )));
    }
    if args.radius < 0 {
        return Err(CliError::InvalidArgument("radius must not be negative".into()));
    }
    let zoom = ZoomLevel::new(args.zoom)?;

    let runner = CliRunner::new(config_path)?;
    runner.log_startup("simulate");

    let mut config = runner.config().resources_config();
    if let Some(workers) = args.fetch_workers {
        config = config.with_fetch_workers(workers);
    }
    let upload_limit = args.upload_limit.unwrap_or(config.upload_limit);
    let shutdown_timeout = config.shutdown_timeout;

    let device = Arc::new(HeadlessDevice::new());
    let resources = MapResources::builder(device.clone()).config(config).build()?;

    let latency = Duration::from_millis(args.latency_ms);
    let raster: Arc<dyn TileProvider> = Arc::new(GradientRaster { size: 64, latency });
    resources.set_providers(ProviderSet::base_layer(raster));
    let elevation: Arc<dyn TileProvider> = Arc::new(FlatElevation { size: 32, latency });
    resources.set_providers(ProviderSet::Elevation(Some(elevation)));
    if args.symbols {
        let labels: Arc<dyn SymbolProvider> = Arc::new(Labels { latency });
        resources.set_providers(ProviderSet::Symbols(vec![labels]));
    }

    println!(
        "Simulating {} frames at zoom {} ({} tiles visible)",
        args.frames,
        zoom,
        (2 * args.radius + 1).pow(2)
    );

    let started = Instant::now();
    let totals = drive(&resources, &args, zoom, upload_limit);
    let elapsed = started.elapsed();

    let settled = resources.wait_for_requests(shutdown_timeout);
    let stats = resources.stats();

    println!();
    println!("Frames:            {} in {:.2?}", args.frames, elapsed);
    println!("Uploaded:          {}", totals.uploaded);
    println!("Unloaded:          {}", totals.unloaded);
    println!("Saturated frames:  {}", totals.saturated_frames);
    println!(
        "Draw lookups:      {} drawn, {} processing, {} unavailable",
        totals.drawn, totals.placeholders, totals.unavailable
    );
    println!("Fetches started:   {}", stats.fetches_started);
    println!("Peak fetches:      {}", stats.peak_fetches_in_flight);
    println!("Symbols published: {}", stats.published_symbols);
    println!("Entries by state:");
    for state in ResourceState::ALL {
        let count = stats.in_state(state);
        if count > 0 {
            println!("  {:<18} {}", state.name(), count);
        }
    }

    info!(
        uploaded = totals.uploaded,
        unloaded = totals.unloaded,
        fetches = stats.fetches_started,
        "Simulation finished"
    );

    resources.shutdown();
    let leaked = device.live_allocations();
    println!();
    println!(
        "Device after shutdown: {} live allocations, {} double releases",
        leaked,
        device.stats().double_releases
    );

    if leaked > 0 {
        return Err(CliError::Leak { allocations: leaked });
    }
    if !settled {
        return Err(CliError::Timeout);
    }
    Ok(())
}

/// Run the frame loop: move the camera, sync, then look up every visible tile.
fn drive(resources: &MapResources, args: &SimulateArgs, zoom: ZoomLevel, upload_limit: u32) -> Totals {
    let raster = resources.raster_layer(0);
    let frame = Duration::from_millis(args.frame_ms);
    let mut totals = Totals::default();

    for index in 0..args.frames {
        let visible = visible_tiles(camera(index, args.frames_per_tile, zoom), args.radius);
        resources.set_active_zone(visible.iter().copied(), zoom);

        thread::sleep(frame);
        totals.add_sync(resources.sync_gpu(upload_limit));

        if let Some(raster) = &raster {
            for &tile in &visible {
                totals.add_draw(resources.tile_for_draw(raster, tile, zoom));
            }
        }
    }
    totals
}

/// Camera tile for frame `index`: a horizontal pan through the map centre.
fn camera(index: u32, frames_per_tile: u32, zoom: ZoomLevel) -> TileId {
    let centre = 1i32 << (zoom.value() - 1);
    let step = (index / frames_per_tile.max(1)) as i32;
    TileId::new(centre + step, centre)
}

fn visible_tiles(centre: TileId, radius: i32) -> Vec<TileId> {
    let mut tiles = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            tiles.push(TileId::new(centre.x + dx, centre.y + dy));
        }
    }
    tiles
}
