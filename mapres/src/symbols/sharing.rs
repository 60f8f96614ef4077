//! Per-zoom deduplication of symbol groups.
//!
//! Symbols of an object that straddles tile borders are produced once and held
//! by every tile that shows the object. The cache itself only keeps weak
//! references; the tiles hold the strong ones.

use crate::provider::SymbolsGroup;
use crate::tile::{ZoomLevel, ZOOM_LEVELS_COUNT};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};

/// Weak map of shared symbol groups, one level per zoom.
#[derive(Debug)]
pub struct SymbolSharingCache {
    levels: Vec<DashMap<u64, Weak<SymbolsGroup>>>,
}

impl Default for SymbolSharingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolSharingCache {
    pub fn new() -> Self {
        Self {
            levels: (0..ZOOM_LEVELS_COUNT).map(|_| DashMap::new()).collect(),
        }
    }

    fn level(&self, zoom: ZoomLevel) -> &DashMap<u64, Weak<SymbolsGroup>> {
        &self.levels[zoom.index()]
    }

    /// Take a hold on the live group for `object_id`, if any.
    pub fn lookup(&self, zoom: ZoomLevel, object_id: u64) -> Option<Arc<SymbolsGroup>> {
        self.level(zoom)
            .get(&object_id)
            .and_then(|weak| weak.upgrade())
    }

    /// Publish a freshly produced group, or take a hold on the one already live.
    ///
    /// Two tiles fetching the same object concurrently both produce a group;
    /// the first one in wins and the second tile adopts it.
    pub fn share(&self, zoom: ZoomLevel, group: SymbolsGroup) -> Arc<SymbolsGroup> {
        match self.level(zoom).entry(group.object.id) {
            Entry::Occupied(mut occupied) => {
                if let Some(live) = occupied.get().upgrade() {
                    return live;
                }
                let group = Arc::new(group);
                occupied.insert(Arc::downgrade(&group));
                group
            }
            Entry::Vacant(vacant) => {
                let group = Arc::new(group);
                vacant.insert(Arc::downgrade(&group));
                group
            }
        }
    }

    /// Drop one tile's hold on `group`.
    ///
    /// Returns true when that was the last hold and the cache slot was cleared.
    /// The check runs under the same shard lock used by [`share`](Self::share)
    /// and [`lookup`](Self::lookup), so no other tile can revive the group
    /// between the count check and the removal.
    pub fn release(&self, zoom: ZoomLevel, group: Arc<SymbolsGroup>) -> bool {
        let object_id = group.object.id;
        match self.level(zoom).entry(object_id) {
            Entry::Occupied(occupied) => {
                if occupied.get().as_ptr() != Arc::as_ptr(&group) {
                    // Slot already belongs to a newer group
                    return false;
                }
                if Arc::try_unwrap(group).is_ok() {
                    occupied.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Number of live groups at `zoom`.
    pub fn live_count(&self, zoom: ZoomLevel) -> usize {
        self.level(zoom)
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Number of slots across all zoom levels, expired or not.
    pub fn len(&self) -> usize {
        self.levels.iter().map(DashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
