//! GPU sync engine.
//!
//! Moves fetched entries onto the device and unloads entries the scheduler
//! marked for eviction. Every method here touches the graphics device and must
//! only be called from the GPU-owning thread; [`MapResources`] enforces that.
//!
//! [`MapResources`]: crate::resources::MapResources

use crate::gpu::GraphicsDevice;
use crate::resource::{ResourceEntry, ResourceState, TiledCollection};
use crate::symbols::PublishedSymbols;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Outcome of one [`GpuSyncEngine::sync`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries that reached `Uploaded`
    pub uploaded: u32,
    /// Entries that reached `Unloaded`
    pub unloaded: u32,
    /// True if `Ready` entries were left behind by the limit or a failed upload
    pub more_available: bool,
}

impl SyncReport {
    /// Whether anything on the device changed.
    pub fn changed(&self) -> bool {
        self.uploaded > 0 || self.unloaded > 0
    }
}

pub struct GpuSyncEngine {
    device: Arc<dyn GraphicsDevice>,
    published: Arc<PublishedSymbols>,
    wait_for_upload: bool,
}

impl GpuSyncEngine {
    /// `wait_for_upload` makes each batch of uploads wait for device
    /// completion, for setups where a worker thread owns the device.
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        published: Arc<PublishedSymbols>,
        wait_for_upload: bool,
    ) -> Self {
        Self {
            device,
            published,
            wait_for_upload,
        }
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    /// Unload evicted entries, then upload up to `limit` ready ones
    /// (0 = no limit).
    pub fn sync(&self, collections: &[Arc<TiledCollection>], limit: u32) -> SyncReport {
        let unloaded = self.unload_pending(collections);
        let (uploaded, more_available) = self.upload_ready(collections, limit);

        if unloaded > 0 || uploaded > 0 {
            debug!(uploaded, unloaded, more_available, "GPU sync");
        }
        SyncReport {
            uploaded,
            unloaded,
            more_available,
        }
    }

    /// Release the device memory of every `UnloadPending` entry.
    pub fn unload_pending(&self, collections: &[Arc<TiledCollection>]) -> u32 {
        let mut unloaded = 0;
        for collection in collections {
            let pending =
                collection.obtain_entries(|entry, _| entry.state() == ResourceState::UnloadPending);
            for entry in pending {
                if !entry.set_state_if(ResourceState::UnloadPending, ResourceState::Unloading) {
                    continue;
                }
                entry.unload(self.device.as_ref(), &self.published);
                entry.set_state_if(ResourceState::Unloading, ResourceState::Unloaded);
                unloaded += 1;
            }
        }
        unloaded
    }

    /// Upload `Ready` entries, at most `limit` of them unless `limit` is 0.
    ///
    /// Returns the number uploaded and whether `Ready` entries remain, either
    /// because more than `limit` were eligible or because an upload failed.
    pub fn upload_ready(&self, collections: &[Arc<TiledCollection>], limit: u32) -> (u32, bool) {
        let mut ready: Vec<Arc<ResourceEntry>> = Vec::new();
        for collection in collections {
            ready.extend(collection.obtain_entries(|entry, _| entry.state() == ResourceState::Ready));
        }

        let eligible = ready.len();
        let mut more_available = false;
        if limit > 0 && eligible > limit as usize {
            ready.truncate(limit as usize);
            more_available = true;
        }

        let mut uploaded = Vec::with_capacity(ready.len());
        for entry in ready {
            if !entry.set_state_if(ResourceState::Ready, ResourceState::Uploading) {
                continue;
            }
            match entry.upload(self.device.as_ref(), &self.published) {
                Ok(()) => uploaded.push(entry),
                Err(e) => {
                    error!(
                        tile = %entry.tile(),
                        zoom = %entry.zoom(),
                        kind = %entry.resource_type(),
                        error = %e,
                        "Failed to upload resource"
                    );
                    entry.set_state_if(ResourceState::Uploading, ResourceState::Ready);
                    more_available = true;
                }
            }
        }

        if self.wait_for_upload && !uploaded.is_empty() {
            self.device.wait_upload_complete();
        }
        for entry in &uploaded {
            entry.set_state_if(ResourceState::Uploading, ResourceState::Uploaded);
            trace!(tile = %entry.tile(), zoom = %entry.zoom(), "Uploaded");
        }

        (uploaded.len() as u32, more_available)
    }

    /// Drive every entry of `collection` to removal, unloading what is on the
    /// device.
    ///
    /// Returns the number of entries removed. Afterwards the collection holds
    /// no GPU-resident entry.
    pub fn release_all(&self, collection: &TiledCollection) -> usize {
        let mut unloaded = 0usize;
        let removed = collection.remove_entries(|entry, _| {
            let (remove, was_unloaded) = self.force_release(entry);
            if was_unloaded {
                unloaded += 1;
            }
            remove
        });

        debug!(
            collection = %collection.id(),
            kind = %collection.resource_type(),
            removed,
            unloaded,
            remaining = collection.len(),
            "Released collection"
        );
        removed
    }

    /// Returns `(ready for removal, unloaded from device)`.
    fn force_release(&self, entry: &ResourceEntry) -> (bool, bool) {
        if entry.set_state_if(ResourceState::Requested, ResourceState::JustBeforeDeath) {
            entry.cancel_request();
            return (true, false);
        }
        if entry
            .set_state_if_any(
                &[
                    ResourceState::ProcessingRequest,
                    ResourceState::Ready,
                    ResourceState::Unloaded,
                    ResourceState::Unavailable,
                ],
                ResourceState::JustBeforeDeath,
            )
            .is_some()
        {
            return (true, false);
        }

        entry.set_state_if(ResourceState::Uploaded, ResourceState::UnloadPending);
        if entry.set_state_if(ResourceState::UnloadPending, ResourceState::Unloading) {
            entry.unload(self.device.as_ref(), &self.published);
            entry.set_state_if(ResourceState::Unloading, ResourceState::Unloaded);
            let doomed = entry.set_state_if(ResourceState::Unloaded, ResourceState::JustBeforeDeath);
            return (doomed, true);
        }

        match entry.state() {
            ResourceState::JustBeforeDeath => (true, false),
            state => {
                crate::invariant_violation!(
                    "cannot release {}@{} while {}",
                    entry.tile(),
                    entry.zoom(),
                    state
                );
                (false, false)
            }
        }
    }
}
