//! In-memory graphics device.
//!
//! Hands out sequential handles and tracks which are live, so callers can check
//! that every upload was eventually released. Used by the simulator and tests.

use super::{GpuHandle, GraphicsDevice};
use crate::error::DeviceError;
use crate::provider::{MapSymbol, TileData};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::warn;

/// Counters exposed by [`HeadlessDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub tile_uploads: u64,
    pub symbol_uploads: u64,
    pub releases: u64,
    pub failed_uploads: u64,
    pub double_releases: u64,
    pub upload_waits: u64,
    pub live_allocations: usize,
    pub live_bytes: u64,
}

/// Device that keeps allocations in a table instead of on a GPU.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_handle: AtomicU64,
    live: Mutex<HashMap<u64, u64>>,
    live_bytes: AtomicU64,
    tile_uploads: AtomicU64,
    symbol_uploads: AtomicU64,
    releases: AtomicU64,
    failed_uploads: AtomicU64,
    double_releases: AtomicU64,
    upload_waits: AtomicU64,
    fail_next: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` uploads fail with [`DeviceError::OutOfMemory`].
    pub fn fail_next_uploads(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Let `successes` more uploads through, then fail exactly one.
    pub fn fail_upload_after(&self, successes: usize) {
        *self.fail_after.lock() = Some(successes);
    }

    pub fn stats(&self) -> HeadlessStats {
        HeadlessStats {
            tile_uploads: self.tile_uploads.load(Ordering::SeqCst),
            symbol_uploads: self.symbol_uploads.load(Ordering::SeqCst),
            releases: self.releases.load(Ordering::SeqCst),
            failed_uploads: self.failed_uploads.load(Ordering::SeqCst),
            double_releases: self.double_releases.load(Ordering::SeqCst),
            upload_waits: self.upload_waits.load(Ordering::SeqCst),
            live_allocations: self.live.lock().len(),
            live_bytes: self.live_bytes.load(Ordering::SeqCst),
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, raw: u64) -> bool {
        self.live.lock().contains_key(&raw)
    }

    fn allocate(&self, bytes: usize) -> Result<GpuHandle, DeviceError> {
        let fail_now = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let fail_scheduled = {
            let mut fail_after = self.fail_after.lock();
            match *fail_after {
                Some(0) => {
                    *fail_after = None;
                    true
                }
                Some(n) => {
                    *fail_after = Some(n - 1);
                    false
                }
                None => false,
            }
        };
        if fail_now || fail_scheduled {
            self.failed_uploads.fetch_add(1, Ordering::SeqCst);
            return Err(DeviceError::OutOfMemory { requested: bytes });
        }

        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.lock().insert(raw, bytes as u64);
        self.live_bytes.fetch_add(bytes as u64, Ordering::SeqCst);
        Ok(GpuHandle::new(raw))
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn upload_tile(&self, data: &TileData) -> Result<GpuHandle, DeviceError> {
        if data.is_released() {
            return Err(DeviceError::Rejected("tile pixels already released".into()));
        }
        let handle = self.allocate(data.pixels().len())?;
        self.tile_uploads.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn upload_symbol(&self, symbol: &MapSymbol) -> Result<GpuHandle, DeviceError> {
        let bitmap = symbol
            .bitmap()
            .ok_or_else(|| DeviceError::Rejected("symbol bitmap already released".into()))?;
        let handle = self.allocate(bitmap.len())?;
        self.symbol_uploads.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn release(&self, handle: GpuHandle) {
        if let Some(bytes) = self.live.lock().remove(&handle.raw()) {
            self.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
            self.releases.fetch_add(1, Ordering::SeqCst);
        } else {
            warn!(handle = handle.raw(), "Release of unknown device handle");
            self.double_releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_upload_complete(&self) {
        self.upload_waits.fetch_add(1, Ordering::SeqCst);
    }
}
