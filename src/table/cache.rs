//! Bounded LRU cache mapping a table's file identity to its open,
//! memory-mapped `Table`. Opening a table costs a file open and an mmap
//! call; caching the whole handle (rather than individual decoded
//! blocks) avoids paying that cost on every participant lookup within a
//! merge cycle.
//!
//! Deferred close falls out of `Arc<Table>` reference counting for free:
//! evicting a key drops the cache's own `Arc`, but any iterator still
//! holding a clone keeps the `Table` — and its `Mmap` — alive until that
//! clone is dropped. A reader that opened a table before it was evicted
//! keeps reading it to completion with no extra bookkeeping.

use std::path::Path;
use std::sync::Arc;

use moka::sync::Cache;
use tracing::debug;

use super::Table;
use crate::error::MergeResult;
use crate::key::PropertyId;

/// Identifies one table within a property's directory, independent of its
/// on-disk filename — an unstable slot id or a stable file id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableLocator {
    Unstable(usize),
    UnstableBuffer(usize),
    Stable(u64),
    StableBuffer(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    property_id: PropertyId,
    locator: TableLocator,
}

#[derive(Clone)]
pub struct TableCache {
    cache: Cache<CacheKey, Arc<Table>>,
}

impl TableCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::new(capacity),
        }
    }

    /// Returns the cached table for `(property_id, locator)`, opening it
    /// from `path` on a miss. Concurrent misses on the same key dedupe to
    /// one load, per moka's internal synchronization.
    pub fn get_or_open(
        &self,
        property_id: PropertyId,
        locator: TableLocator,
        path: &Path,
    ) -> MergeResult<Arc<Table>> {
        let key = CacheKey {
            property_id,
            locator,
        };
        if let Some(table) = self.cache.get(&key) {
            return Ok(table);
        }
        let file_number = match locator {
            TableLocator::Unstable(slot) | TableLocator::UnstableBuffer(slot) => slot as u64,
            TableLocator::Stable(id) | TableLocator::StableBuffer(id) => id,
        };
        let table = Arc::new(Table::open(path, file_number)?);
        self.cache.insert(key, table.clone());
        Ok(table)
    }

    /// Evicts a table from the cache. Called before a file is physically
    /// deleted, and before a slot id is reused by a later rewrite.
    pub fn evict(&self, property_id: PropertyId, locator: TableLocator) {
        debug!(?property_id, ?locator, "evicting table from cache");
        self.cache.invalidate(&CacheKey {
            property_id,
            locator,
        });
    }

    /// Invalidates every entry, draining the cache.
    pub fn close(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::builder::TableBuilder;
    use crate::key::InternalKey;

    fn build_table(path: &Path) {
        let mut builder = TableBuilder::new(path, 4096, 16).unwrap();
        builder
            .add(&InternalKey::new(1, 1, 10), b"v")
            .unwrap();
        builder.finish().unwrap();
    }

    #[test]
    fn miss_then_hit_returns_the_same_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unstable-0.prop");
        build_table(&path);

        let cache = TableCache::new(8);
        let locator = TableLocator::Unstable(0);
        let first = cache.get_or_open(1, locator, &path).unwrap();
        let second = cache.get_or_open(1, locator, &path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn eviction_does_not_invalidate_an_iterator_already_holding_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unstable-0.prop");
        build_table(&path);

        let cache = TableCache::new(8);
        let locator = TableLocator::Unstable(0);
        let held = cache.get_or_open(1, locator, &path).unwrap();
        cache.evict(1, locator);
        // the reader's Arc keeps the table (and its mmap) alive.
        assert_eq!(held.num_blocks(), 1);
    }
}
