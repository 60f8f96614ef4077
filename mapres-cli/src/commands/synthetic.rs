//! Procedural providers for the simulator.
//!
//! Everything is derived from the tile coordinates, so runs are repeatable.

use std::thread;
use std::time::Duration;

use mapres::error::ProviderError;
use mapres::provider::{
    MapSymbol, SourceObject, SymbolProvider, SymbolsGroup, SymbolsTile, TileData, TileProvider,
};
use mapres::stub::generate_solid_tile;
use mapres::tile::{AreaI, TileId, ZoomLevel};

/// Raster tiles coloured by position. Every eleventh tile has no imagery.
pub struct GradientRaster {
    pub size: u32,
    pub latency: Duration,
}

impl GradientRaster {
    fn has_imagery(tile: TileId) -> bool {
        (tile.x.wrapping_mul(7).wrapping_add(tile.y.wrapping_mul(13))).rem_euclid(11) != 0
    }
}

impl TileProvider for GradientRaster {
    fn fetch_tile(&self, tile: TileId, _zoom: ZoomLevel) -> Result<Option<TileData>, ProviderError> {
        thread::sleep(self.latency);
        if !Self::has_imagery(tile) {
            return Ok(None);
        }
        let color = [
            (tile.x.rem_euclid(16) * 16) as u8,
            (tile.y.rem_euclid(16) * 16) as u8,
            96,
            255,
        ];
        Ok(Some(generate_solid_tile(self.size, color)))
    }
}

/// Flat heightfield, one byte per sample.
pub struct FlatElevation {
    pub size: u32,
    pub latency: Duration,
}

impl TileProvider for FlatElevation {
    fn fetch_tile(&self, _tile: TileId, _zoom: ZoomLevel) -> Result<Option<TileData>, ProviderError> {
        thread::sleep(self.latency);
        let samples = (self.size * self.size) as usize;
        Ok(Some(TileData::new(self.size, self.size, false, vec![0u8; samples])))
    }
}

/// One label inside each tile, plus a road name spanning each horizontal pair
/// of tiles.
pub struct Labels {
    pub latency: Duration,
}

impl Labels {
    const ROAD_ID_BASE: u64 = 1 << 40;

    fn road(tile: TileId, area: &AreaI) -> SourceObject {
        let pair = tile.x.div_euclid(2);
        let width = area.right as i64 - area.left as i64 + 1;
        let left = area.left as i64 - tile.x.rem_euclid(2) as i64 * width;
        let right = (left + 2 * width - 8).min(i32::MAX as i64);
        SourceObject {
            id: Self::ROAD_ID_BASE + ((pair as u64) << 20) + tile.y as u64,
            bbox31: AreaI::new(area.top, (left + 8) as i32, area.top, right as i32),
        }
    }

    fn place(tile: TileId, area: &AreaI) -> SourceObject {
        SourceObject {
            id: ((tile.x as u64) << 20) + tile.y as u64,
            bbox31: AreaI::new(area.top, area.left, area.top, area.left),
        }
    }
}

impl SymbolProvider for Labels {
    fn fetch_symbols(
        &self,
        tile: TileId,
        zoom: ZoomLevel,
        filter: &mut dyn FnMut(&SourceObject) -> bool,
    ) -> Result<Option<SymbolsTile>, ProviderError> {
        thread::sleep(self.latency);
        let area = AreaI::for_tile(tile, zoom);

        let mut groups = Vec::new();
        for (order, object) in [(0, Self::place(tile, &area)), (1, Self::road(tile, &area))] {
            if filter(&object) {
                let anchor = (object.bbox31.left, object.bbox31.top);
                let symbol = MapSymbol::new(order, anchor, vec![0xffu8; 64]).with_offset(0, -8 * order);
                groups.push(SymbolsGroup::new(object, vec![symbol]));
            }
        }
        Ok(Some(SymbolsTile::new(groups)))
    }

    fn can_symbols_be_shared(&self, object: &SourceObject) -> bool {
        object.id >= Self::ROAD_ID_BASE
    }
}
