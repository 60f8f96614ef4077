//! Graphics device abstraction.
//!
//! The device is driven exclusively from the GPU-owning thread. Implementations
//! need `Send + Sync` only so the manager can be moved to a dedicated GPU worker
//! thread; calls never overlap.

mod headless;

pub use headless::{HeadlessDevice, HeadlessStats};

use crate::error::DeviceError;
use crate::provider::{MapSymbol, TileData};

/// Device-side allocation with exactly one owner.
///
/// Deliberately not `Clone`: giving the handle back through
/// [`GraphicsDevice::release`] consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct GpuHandle {
    raw: u64,
}

impl GpuHandle {
    pub fn new(raw: u64) -> Self {
        Self { raw }
    }

    /// Backend reference for draw calls.
    pub fn raw(&self) -> u64 {
        self.raw
    }
}

/// Capability surface used by the GPU sync engine.
pub trait GraphicsDevice: Send + Sync + 'static {
    /// Upload a tile bitmap or elevation grid as a texture.
    fn upload_tile(&self, data: &TileData) -> Result<GpuHandle, DeviceError>;

    /// Upload one symbol bitmap.
    fn upload_symbol(&self, symbol: &MapSymbol) -> Result<GpuHandle, DeviceError>;

    /// Free a previous allocation.
    fn release(&self, handle: GpuHandle);

    /// Block until previously issued uploads are visible to other contexts.
    ///
    /// Only called when uploads run on a worker thread separate from the
    /// render thread.
    fn wait_upload_complete(&self) {}
}
