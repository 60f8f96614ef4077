//! Placeholder textures drawn in place of missing tiles.
//!
//! Two solid-colour bitmaps are generated and uploaded when the manager is
//! built:
//!
//! - **processing** (grey): the tile is requested but not yet on the device
//! - **unavailable** (magenta): the provider has no data for the tile
//!
//! Both live until [`StubTextures::release`] is called at shutdown.

use crate::error::DeviceError;
use crate::gpu::{GpuHandle, GraphicsDevice};
use crate::provider::TileData;
use image::{Rgba, RgbaImage};

/// Colour of tiles still being fetched.
pub const PROCESSING_COLOR: [u8; 4] = [128, 128, 128, 255];

/// Colour of tiles the provider has no data for.
pub const UNAVAILABLE_COLOR: [u8; 4] = [255, 0, 255, 255];

/// Generate a solid-colour RGBA tile.
///
/// # Example
///
/// ```
/// use mapres::stub::{generate_solid_tile, UNAVAILABLE_COLOR};
///
/// let tile = generate_solid_tile(4, UNAVAILABLE_COLOR);
/// assert_eq!(tile.pixels().len(), 4 * 4 * 4);
/// assert_eq!(&tile.pixels()[0..4], &UNAVAILABLE_COLOR);
/// ```
pub fn generate_solid_tile(size: u32, color: [u8; 4]) -> TileData {
    let size = size.max(1);
    let image = RgbaImage::from_pixel(size, size, Rgba(color));
    TileData::new(size, size, true, image.into_raw())
}

/// Uploaded placeholder textures.
#[derive(Debug)]
pub struct StubTextures {
    processing: Option<GpuHandle>,
    unavailable: Option<GpuHandle>,
}

impl StubTextures {
    /// Generate both placeholders at `size`×`size` and upload them.
    ///
    /// If the second upload fails the first one is released again.
    pub fn upload(device: &dyn GraphicsDevice, size: u32) -> Result<Self, DeviceError> {
        let processing = device.upload_tile(&generate_solid_tile(size, PROCESSING_COLOR))?;
        let unavailable = match device.upload_tile(&generate_solid_tile(size, UNAVAILABLE_COLOR)) {
            Ok(handle) => handle,
            Err(e) => {
                device.release(processing);
                return Err(e);
            }
        };

        Ok(Self {
            processing: Some(processing),
            unavailable: Some(unavailable),
        })
    }

    /// Texture of tiles still being fetched; 0 once released.
    pub fn processing(&self) -> u64 {
        self.processing.as_ref().map_or(0, GpuHandle::raw)
    }

    /// Texture of tiles without data; 0 once released.
    pub fn unavailable(&self) -> u64 {
        self.unavailable.as_ref().map_or(0, GpuHandle::raw)
    }

    pub fn is_released(&self) -> bool {
        self.processing.is_none() && self.unavailable.is_none()
    }

    /// Give both textures back to the device. Later calls do nothing.
    pub fn release(&mut self, device: &dyn GraphicsDevice) {
        if let Some(handle) = self.processing.take() {
            device.release(handle);
        }
        if let Some(handle) = self.unavailable.take() {
            device.release(handle);
        }
    }
}
