//! Sparse (tile, zoom) map of resource entries for one provider binding.

use super::entry::{EntryBody, ResourceEntry};
use super::state::ResourceState;
use super::symbols::SymbolsBody;
use super::tile::TileBody;
use crate::symbols::SymbolCaches;
use crate::tile::{ResourceType, TileId, ZoomLevel};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(u64);

impl CollectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collection#{}", self.0)
    }
}

type EntryKey = (TileId, ZoomLevel);

/// All entries of one resource type served by one provider.
///
/// Readers (lookups, enumeration) share the map lock; insertion and removal
/// take it exclusively. Entries only leave the map from `JustBeforeDeath`.
pub struct TiledCollection {
    id: CollectionId,
    resource_type: ResourceType,
    entries: RwLock<HashMap<EntryKey, Arc<ResourceEntry>>>,
    symbols: Option<Arc<SymbolCaches>>,
    fetching: Mutex<HashSet<EntryKey>>,
    fetch_done: Condvar,
}

/// Exclusive right to call the provider for one key. Released on drop.
pub(crate) struct FetchSlot<'a> {
    collection: &'a TiledCollection,
    key: EntryKey,
}

impl Drop for FetchSlot<'_> {
    fn drop(&mut self) {
        self.collection.fetching.lock().remove(&self.key);
        self.collection.fetch_done.notify_all();
    }
}

impl TiledCollection {
    pub fn new(resource_type: ResourceType) -> Self {
        let symbols = match resource_type {
            ResourceType::Symbols => Some(Arc::new(SymbolCaches::new())),
            ResourceType::ElevationData | ResourceType::RasterMap => None,
        };
        Self {
            id: CollectionId::next(),
            resource_type,
            entries: RwLock::new(HashMap::new()),
            symbols,
            fetching: Mutex::new(HashSet::new()),
            fetch_done: Condvar::new(),
        }
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Sharing caches of a symbols collection.
    pub fn symbol_caches(&self) -> Option<&Arc<SymbolCaches>> {
        self.symbols.as_ref()
    }

    /// Default factory: a fresh entry with the body matching this collection.
    pub fn allocate_entry(&self, tile: TileId, zoom: ZoomLevel) -> ResourceEntry {
        let body = match &self.symbols {
            Some(caches) => EntryBody::Symbols(SymbolsBody::new(zoom, Arc::clone(caches))),
            None => EntryBody::Tile(TileBody::new()),
        };
        ResourceEntry::new(self.id, self.resource_type, tile, zoom, body)
    }

    /// Return the entry for `(tile, zoom)`, creating it with `factory` on a miss.
    ///
    /// Concurrent callers asking for the same key get the same entry.
    pub fn obtain_or_allocate<F>(&self, tile: TileId, zoom: ZoomLevel, factory: F) -> Arc<ResourceEntry>
    where
        F: FnOnce(&TiledCollection, TileId, ZoomLevel) -> ResourceEntry,
    {
        if let Some(entry) = self.entries.read().get(&(tile, zoom)) {
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write();
        let entry = entries
            .entry((tile, zoom))
            .or_insert_with(|| Arc::new(factory(self, tile, zoom)));
        Arc::clone(entry)
    }

    pub fn obtain_entry(&self, tile: TileId, zoom: ZoomLevel) -> Option<Arc<ResourceEntry>> {
        self.entries.read().get(&(tile, zoom)).cloned()
    }

    pub fn contains(&self, tile: TileId, zoom: ZoomLevel) -> bool {
        self.entries.read().contains_key(&(tile, zoom))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entries accepted by `predicate`, which may set its flag to stop early.
    pub fn obtain_entries<F>(&self, mut predicate: F) -> Vec<Arc<ResourceEntry>>
    where
        F: FnMut(&Arc<ResourceEntry>, &mut bool) -> bool,
    {
        let entries = self.entries.read();
        let mut cancel = false;
        let mut accepted = Vec::new();
        for entry in entries.values() {
            if predicate(entry, &mut cancel) {
                accepted.push(Arc::clone(entry));
            }
            if cancel {
                break;
            }
        }
        accepted
    }

    /// Remove every entry `predicate` returns true for.
    ///
    /// The predicate runs under the write lock, so it is the only party
    /// looking at the map while it moves entries to `JustBeforeDeath`. Setting
    /// the flag stops the scan after the current entry. Returns the number of
    /// entries removed.
    pub fn remove_entries<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&Arc<ResourceEntry>, &mut bool) -> bool,
    {
        let mut removed = Vec::new();
        {
            let mut entries = self.entries.write();
            let mut cancel = false;
            let mut doomed = Vec::new();
            for (key, entry) in entries.iter() {
                if predicate(entry, &mut cancel) {
                    if entry.state() == ResourceState::JustBeforeDeath {
                        doomed.push(*key);
                    } else {
                        crate::invariant_violation!(
                            "refusing to remove {}@{} from {} in state {}",
                            key.0,
                            key.1,
                            self.id,
                            entry.state()
                        );
                    }
                }
                if cancel {
                    break;
                }
            }
            for key in doomed {
                if let Some(entry) = entries.remove(&key) {
                    removed.push(entry);
                }
            }
        }
        // Entry bodies release shared symbol holds on drop; do that unlocked
        removed.len()
    }

    /// Remove exactly `entry`, if it is still the one mapped under its key.
    pub fn remove_entry(&self, entry: &Arc<ResourceEntry>) -> bool {
        let key = (entry.tile(), entry.zoom());
        let removed = {
            let mut entries = self.entries.write();
            let is_current = entries
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, entry));
            if !is_current {
                return false;
            }
            if entry.state() != ResourceState::JustBeforeDeath {
                crate::invariant_violation!(
                    "refusing to remove {}@{} from {} in state {}",
                    key.0,
                    key.1,
                    self.id,
                    entry.state()
                );
                return false;
            }
            entries.remove(&key)
        };
        removed.is_some()
    }

    /// Claim the provider slot for `(tile, zoom)`.
    ///
    /// An evicted entry's fetch may still be inside its provider call when a
    /// fresh entry for the same key is dispatched; the fresh fetch waits here
    /// until the stale one returns.
    pub(crate) fn claim_fetch(&self, tile: TileId, zoom: ZoomLevel) -> FetchSlot<'_> {
        let key = (tile, zoom);
        let mut fetching = self.fetching.lock();
        while fetching.contains(&key) {
            self.fetch_done.wait(&mut fetching);
        }
        fetching.insert(key);
        FetchSlot {
            collection: self,
            key,
        }
    }

    /// Entries currently holding device memory.
    pub fn count_gpu_resident(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.state().is_gpu_resident())
            .count()
    }

    /// Number of entries in `state`.
    pub fn count_in_state(&self, state: ResourceState) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.state() == state)
            .count()
    }

    /// Add this collection's entries to a per-state histogram.
    pub(crate) fn accumulate_states(&self, histogram: &mut [usize; ResourceState::COUNT]) {
        for entry in self.entries.read().values() {
            histogram[entry.state() as usize] += 1;
        }
    }
}

impl fmt::Debug for TiledCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiledCollection")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("entries", &self.len())
            .finish()
    }
}

impl Drop for TiledCollection {
    fn drop(&mut self) {
        let resident = self.count_gpu_resident();
        if resident > 0 && !std::thread::panicking() {
            crate::invariant_violation!(
                "{} dropped with {} GPU-resident entries",
                self.id,
                resident
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn zoom() -> ZoomLevel {
        ZoomLevel::new(5).unwrap()
    }

    fn obtain(collection: &TiledCollection, x: i32) -> Arc<ResourceEntry> {
        collection.obtain_or_allocate(TileId::new(x, 0), zoom(), |c, t, z| c.allocate_entry(t, z))
    }

    #[test]
    fn test_obtain_or_allocate_returns_existing() {
        let collection = TiledCollection::new(ResourceType::RasterMap);
        let a = obtain(&collection, 1);
        let b = obtain(&collection, 1);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(collection.len(), 1);
        assert_eq!(a.collection_id(), collection.id());
    }

    #[test]
    fn test_factory_runs_once_under_contention() {
        let collection = Arc::new(TiledCollection::new(ResourceType::ElevationData));
        let barrier = Arc::new(Barrier::new(8));
        let calls = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collection = Arc::clone(&collection);
                let barrier = Arc::clone(&barrier);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    barrier.wait();
                    collection.obtain_or_allocate(TileId::new(4, 4), zoom(), |c, t, z| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        c.allocate_entry(t, z)
                    })
                })
            })
            .collect();

        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
    }

    #[test]
    fn test_symbols_collection_allocates_symbol_bodies() {
        let collection = TiledCollection::new(ResourceType::Symbols);
        assert!(collection.symbol_caches().is_some());

        let entry = obtain(&collection, 0);
        assert!(matches!(*entry.body(), EntryBody::Symbols(_)));
    }

    #[test]
    fn test_remove_entries_only_takes_doomed() {
        let collection = TiledCollection::new(ResourceType::RasterMap);
        for x in 0..4 {
            let entry = obtain(&collection, x);
            entry.set_state_if(ResourceState::Unknown, ResourceState::Requesting);
            entry.set_state_if(ResourceState::Requesting, ResourceState::Requested);
        }

        let removed = collection.remove_entries(|entry, _| {
            entry.tile().x % 2 == 0
                && entry.set_state_if(ResourceState::Requested, ResourceState::JustBeforeDeath)
        });
        assert_eq!(removed, 2);
        assert_eq!(collection.len(), 2);
        assert!(collection.contains(TileId::new(1, 0), zoom()));
    }

    #[test]
    fn test_remove_entries_cancel_stops_scan() {
        let collection = TiledCollection::new(ResourceType::RasterMap);
        for x in 0..5 {
            let entry = obtain(&collection, x);
            entry.set_state_if(ResourceState::Unknown, ResourceState::Requesting);
            entry.set_state_if(ResourceState::Requesting, ResourceState::Requested);
        }

        let removed = collection.remove_entries(|entry, cancel| {
            *cancel = true;
            entry.set_state_if(ResourceState::Requested, ResourceState::JustBeforeDeath)
        });
        assert_eq!(removed, 1);
        assert_eq!(collection.len(), 4);
    }

    #[test]
    fn test_remove_entry_checks_identity() {
        let collection = TiledCollection::new(ResourceType::RasterMap);
        let stale = Arc::new(collection.allocate_entry(TileId::new(0, 0), zoom()));
        let live = obtain(&collection, 0);

        for entry in [&stale, &live] {
            entry.set_state_if(ResourceState::Unknown, ResourceState::Requesting);
            entry.set_state_if(ResourceState::Requesting, ResourceState::Requested);
            entry.set_state_if(ResourceState::Requested, ResourceState::JustBeforeDeath);
        }

        assert!(!collection.remove_entry(&stale));
        assert!(collection.remove_entry(&live));
        assert!(!collection.remove_entry(&live));
        assert!(collection.is_empty());
    }

    #[test]
    fn test_fetch_slot_serializes_same_key() {
        let collection = Arc::new(TiledCollection::new(ResourceType::RasterMap));
        let slot = collection.claim_fetch(TileId::new(1, 1), zoom());
        // Other keys are independent
        drop(collection.claim_fetch(TileId::new(2, 1), zoom()));

        let waiter = {
            let collection = Arc::clone(&collection);
            thread::spawn(move || {
                let _slot = collection.claim_fetch(TileId::new(1, 1), zoom());
            })
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(slot);
        waiter.join().unwrap();
        assert!(collection.fetching.lock().is_empty());
    }

    #[test]
    fn test_obtain_entries_and_counts() {
        let collection = TiledCollection::new(ResourceType::RasterMap);
        let entry = obtain(&collection, 0);
        obtain(&collection, 1);
        entry.set_state_if(ResourceState::Unknown, ResourceState::Requesting);

        let requesting =
            collection.obtain_entries(|e, _| e.state() == ResourceState::Requesting);
        assert_eq!(requesting.len(), 1);
        assert_eq!(collection.count_in_state(ResourceState::Unknown), 1);
        assert_eq!(collection.count_gpu_resident(), 0);

        let mut histogram = [0usize; ResourceState::COUNT];
        collection.accumulate_states(&mut histogram);
        assert_eq!(histogram[ResourceState::Unknown as usize], 1);
        assert_eq!(histogram[ResourceState::Requesting as usize], 1);
    }
}
