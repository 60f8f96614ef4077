//! Tile addressing: coordinates, zoom levels, the active zone and 31-bit areas.
//!
//! Map space is a square of 2^31 units per side. A tile at zoom `z` covers
//! `2^(31 - z)` units per side, so zoom 0 is one tile covering the whole map and
//! zoom 31 tiles are one unit wide.

use crate::error::TileError;
use std::collections::HashSet;
use std::fmt;

/// Highest supported zoom level.
pub const MAX_ZOOM_LEVEL: u8 = 31;

/// Number of distinct zoom levels (`0..=MAX_ZOOM_LEVEL`).
pub const ZOOM_LEVELS_COUNT: usize = MAX_ZOOM_LEVEL as usize + 1;

/// Number of raster layer slots: one base layer plus three overlays.
pub const RASTER_MAP_LAYERS_COUNT: usize = 4;

/// Tile coordinate at some zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub x: i32,
    pub y: i32,
}

impl TileId {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Zoom level bounded to `0..=31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ZoomLevel(u8);

impl ZoomLevel {
    pub const MIN: ZoomLevel = ZoomLevel(0);
    pub const MAX: ZoomLevel = ZoomLevel(MAX_ZOOM_LEVEL);

    /// Create a zoom level, rejecting values above [`MAX_ZOOM_LEVEL`].
    pub fn new(level: u8) -> Result<Self, TileError> {
        if level > MAX_ZOOM_LEVEL {
            return Err(TileError::InvalidZoom(level));
        }
        Ok(Self(level))
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Index into per-zoom tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for ZoomLevel {
    type Error = TileError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl fmt::Display for ZoomLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "z{}", self.0)
    }
}

/// Inclusive rectangle in 31-bit map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaI {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl AreaI {
    pub const fn new(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }

    /// Area covered by `tile` at `zoom`.
    ///
    /// Coordinates outside the map are clamped to the `i32` range.
    pub fn for_tile(tile: TileId, zoom: ZoomLevel) -> Self {
        let size = 1i64 << (MAX_ZOOM_LEVEL - zoom.value());
        let left = tile.x as i64 * size;
        let top = tile.y as i64 * size;
        let clamp = |v: i64| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;

        Self {
            top: clamp(top),
            left: clamp(left),
            bottom: clamp(top + size - 1),
            right: clamp(left + size - 1),
        }
    }

    /// True when `other` lies entirely inside this area.
    pub fn contains(&self, other: &AreaI) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.top >= self.top
            && other.bottom <= self.bottom
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

/// Kind of resource kept per tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    ElevationData,
    RasterMap,
    Symbols,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [
        ResourceType::ElevationData,
        ResourceType::RasterMap,
        ResourceType::Symbols,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceType::ElevationData => "elevation",
            ResourceType::RasterMap => "raster",
            ResourceType::Symbols => "symbols",
        }
    }

    /// Bit used in invalidation masks.
    pub(crate) const fn mask_bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The renderer's current visibility request: a tile set at one zoom level.
///
/// Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActiveZone {
    tiles: HashSet<TileId>,
    zoom: ZoomLevel,
}

impl ActiveZone {
    pub fn new(tiles: impl IntoIterator<Item = TileId>, zoom: ZoomLevel) -> Self {
        Self {
            tiles: tiles.into_iter().collect(),
            zoom,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn zoom(&self) -> ZoomLevel {
        self.zoom
    }

    pub fn tiles(&self) -> impl Iterator<Item = TileId> + '_ {
        self.tiles.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// True when the zone wants `tile` at `zoom`.
    pub fn contains(&self, tile: TileId, zoom: ZoomLevel) -> bool {
        zoom == self.zoom && self.tiles.contains(&tile)
    }
}
