//! Symbols currently resident on the device, ordered for drawing.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Token returned by [`PublishedSymbols::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublishedId(u64);

/// One drawable symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedSymbol {
    pub order: i32,
    pub object_id: u64,
    pub texture: u64,
}

/// Draw-order map of uploaded symbols.
#[derive(Debug, Default)]
pub struct PublishedSymbols {
    next_id: AtomicU64,
    by_order: Mutex<BTreeMap<i32, HashMap<PublishedId, PublishedSymbol>>>,
}

impl PublishedSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, order: i32, object_id: u64, texture: u64) -> PublishedId {
        let id = PublishedId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.by_order.lock().entry(order).or_default().insert(
            id,
            PublishedSymbol {
                order,
                object_id,
                texture,
            },
        );
        id
    }

    pub fn unpublish(&self, order: i32, id: PublishedId) -> bool {
        let mut by_order = self.by_order.lock();
        let Some(layer) = by_order.get_mut(&order) else {
            return false;
        };
        let removed = layer.remove(&id).is_some();
        if layer.is_empty() {
            by_order.remove(&order);
        }
        removed
    }

    /// Copy of every published symbol, lowest draw order first.
    pub fn snapshot(&self) -> Vec<PublishedSymbol> {
        self.by_order
            .lock()
            .values()
            .flat_map(|layer| layer.values().copied())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.by_order.lock().values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_ordered() {
        let published = PublishedSymbols::new();
        published.publish(5, 1, 100);
        published.publish(-2, 2, 101);
        published.publish(5, 3, 102);

        let orders: Vec<i32> = published.snapshot().iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![-2, 5, 5]);
        assert_eq!(published.count(), 3);
    }

    #[test]
    fn test_unpublish() {
        let published = PublishedSymbols::new();
        let id = published.publish(1, 9, 42);

        assert!(!published.unpublish(2, id));
        assert!(published.unpublish(1, id));
        assert!(!published.unpublish(1, id));
        assert_eq!(published.count(), 0);
    }
}
