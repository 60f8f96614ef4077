//! Body of raster map and elevation entries.

use crate::error::DeviceError;
use crate::gpu::{GpuHandle, GraphicsDevice};
use crate::provider::TileData;

/// Source payload and texture of a raster or elevation tile.
#[derive(Debug, Default)]
pub struct TileBody {
    data: Option<TileData>,
    texture: Option<GpuHandle>,
}

impl TileBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn store(&mut self, data: Option<TileData>) {
        self.data = data;
    }

    /// Upload the payload and free what the payload does not ask to keep.
    pub(crate) fn upload(&mut self, device: &dyn GraphicsDevice) -> Result<(), DeviceError> {
        if self.texture.is_some() {
            return Err(DeviceError::Rejected("tile texture already uploaded".into()));
        }
        let data = self
            .data
            .as_mut()
            .ok_or_else(|| DeviceError::Rejected("no tile data to upload".into()))?;

        self.texture = Some(device.upload_tile(data)?);
        if data.is_retainable() {
            data.release_pixels();
        } else {
            self.data = None;
        }
        Ok(())
    }

    pub(crate) fn unload(&mut self, device: &dyn GraphicsDevice) {
        if let Some(texture) = self.texture.take() {
            device.release(texture);
        }
    }

    pub fn texture(&self) -> Option<u64> {
        self.texture.as_ref().map(GpuHandle::raw)
    }

    pub fn data(&self) -> Option<&TileData> {
        self.data.as_ref()
    }
}
