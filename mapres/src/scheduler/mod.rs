//! Active-zone driven request scheduling.
//!
//! One pass does two things, in order:
//!
//! 1. **Junk eviction**: every entry outside the active zone (or in a
//!    collection that lost its provider) is driven toward removal. Uploaded
//!    entries are only marked `UnloadPending`; the GPU thread unloads them.
//! 2. **Requests**: every (tile, collection) pair of the zone gets an entry,
//!    and whoever wins `Unknown -> Requesting` on it dispatches the one fetch
//!    task for that resource.
//!
//! Eviction is aggressive: nothing outside the zone is kept around.
//!
//! Passes hold the shared pass lock, so they never interleave with binding
//! changes or invalidation on the GPU thread.

mod daemon;
mod fetch;
mod pool;

pub use daemon::{SchedulerDaemon, ZoneUpdate};
pub use pool::{Activity, FetchPool, PoolTask};

use crate::bindings::BindingRegistry;
use crate::hooks::RendererHooks;
use crate::resource::{ResourceEntry, ResourceState, TiledCollection};
use crate::tile::ActiveZone;
use fetch::FetchTask;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Uploaded entries moved to `UnloadPending`
    pub unload_marked: usize,
    /// Entries removed from their collections
    pub removed: usize,
    /// Fetch tasks dispatched
    pub requested: usize,
}

/// Decides what to evict and what to fetch for an active zone.
pub struct RequestScheduler {
    bindings: Arc<BindingRegistry>,
    pool: FetchPool,
    hooks: Arc<dyn RendererHooks>,
    pass_lock: Arc<Mutex<()>>,
    halted: AtomicBool,
}

impl RequestScheduler {
    pub fn new(
        bindings: Arc<BindingRegistry>,
        pool: FetchPool,
        hooks: Arc<dyn RendererHooks>,
        pass_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            bindings,
            pool,
            hooks,
            pass_lock,
            halted: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &FetchPool {
        &self.pool
    }

    /// Stop scheduling. Waits for a running pass; every later pass is a no-op.
    pub fn halt(&self) {
        let _pass = self.pass_lock.lock();
        self.halted.store(true, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Run a full pass: evict junk, then request what is missing.
    pub fn update_resources(&self, zone: &ActiveZone) -> PassReport {
        let _pass = self.pass_lock.lock();
        if self.is_halted() {
            return PassReport::default();
        }
        let (unload_marked, removed) = self.cleanup_junk_locked(zone);
        let requested = self.request_needed_locked(zone);
        PassReport {
            unload_marked,
            removed,
            requested,
        }
    }

    /// Evict everything `zone` does not need.
    ///
    /// Returns `(marked UnloadPending, removed)`.
    pub fn cleanup_junk(&self, zone: &ActiveZone) -> (usize, usize) {
        let _pass = self.pass_lock.lock();
        if self.is_halted() {
            return (0, 0);
        }
        self.cleanup_junk_locked(zone)
    }

    /// Dispatch fetches for every missing resource of `zone`.
    ///
    /// Returns the number of fetch tasks dispatched.
    pub fn request_needed(&self, zone: &ActiveZone) -> usize {
        let _pass = self.pass_lock.lock();
        if self.is_halted() {
            return 0;
        }
        self.request_needed_locked(zone)
    }

    fn cleanup_junk_locked(&self, zone: &ActiveZone) -> (usize, usize) {
        let mut marked = 0;
        let mut removed = 0;

        for collection in self.bindings.collections() {
            let bound = self.bindings.is_bound(collection.id());
            removed += collection.remove_entries(|entry, _cancel| {
                let needed = bound && zone.contains(entry.tile(), entry.zoom());
                // An unloaded entry has nothing to draw, so it goes even when
                // needed and gets requested again below
                if needed && entry.state() != ResourceState::Unloaded {
                    return false;
                }
                match evict(entry) {
                    Eviction::Keep => false,
                    Eviction::UnloadPending => {
                        marked += 1;
                        false
                    }
                    Eviction::Remove => true,
                }
            });
        }

        (marked, removed)
    }

    fn request_needed_locked(&self, zone: &ActiveZone) -> usize {
        let zoom = zone.zoom();
        let mut requested = 0;

        for binding in self.bindings.bindings() {
            for tile in zone.tiles() {
                let entry = binding
                    .collection
                    .obtain_or_allocate(tile, zoom, |c, t, z| c.allocate_entry(t, z));
                if !entry.set_state_if(ResourceState::Unknown, ResourceState::Requesting) {
                    continue;
                }
                self.submit(&binding.collection, entry);
                requested += 1;
            }
        }

        requested
    }

    fn submit(&self, collection: &Arc<TiledCollection>, entry: Arc<ResourceEntry>) {
        let token = CancellationToken::new();
        entry.attach_request(token.clone());
        if !entry.set_state_if(ResourceState::Requesting, ResourceState::Requested) {
            crate::invariant_violation!(
                "entry {}@{} left Requesting before its fetch was queued",
                entry.tile(),
                entry.zoom()
            );
            return;
        }

        let task = FetchTask::new(
            Arc::clone(collection),
            entry,
            Arc::clone(&self.bindings),
            Arc::clone(&self.hooks),
            token.clone(),
        );
        self.pool.spawn(token, task);
    }
}

enum Eviction {
    Keep,
    UnloadPending,
    Remove,
}

/// First matching transition toward removal.
///
/// Entries in the middle of a GPU transition, or already waiting for unload,
/// are left for a later pass.
fn evict(entry: &ResourceEntry) -> Eviction {
    if entry.set_state_if(ResourceState::Uploaded, ResourceState::UnloadPending) {
        return Eviction::UnloadPending;
    }
    if entry
        .set_state_if_any(
            &[
                ResourceState::Ready,
                ResourceState::ProcessingRequest,
                ResourceState::Unloaded,
                ResourceState::Unavailable,
            ],
            ResourceState::JustBeforeDeath,
        )
        .is_some()
    {
        return Eviction::Remove;
    }
    if entry.set_state_if(ResourceState::Requested, ResourceState::JustBeforeDeath) {
        entry.cancel_request();
        return Eviction::Remove;
    }

    match entry.state() {
        ResourceState::JustBeforeDeath => Eviction::Remove,
        // Passes are serialized and finish their own dispatches
        state @ (ResourceState::Unknown | ResourceState::Requesting) => {
            crate::invariant_violation!(
                "entry {} @ {} left in {} by a previous pass",
                entry.tile(),
                entry.zoom(),
                state
            );
            Eviction::Keep
        }
        // Mid GPU transition, or moved on since the attempts above
        _ => Eviction::Keep,
    }
}
