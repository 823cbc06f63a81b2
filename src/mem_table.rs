//! The in-memory write buffer handed to the merge worker: a concurrent
//! skip map keyed directly on `InternalKey` (its `Ord` impl already
//! encodes the propertyId/entityId/startTime-descending comparator, so no
//! separately-encoded key wrapper is needed). Read-only once the worker
//! takes it; the map and its iterator are cheap to clone and share across
//! the threads that produced and now drain it.

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use ouroboros::self_referencing;

use crate::error::MergeResult;
use crate::iterators::StorageIterator;
use crate::key::{InternalKey, PropertyId, StartTime};

/// An ordered in-memory key -> value buffer. Once handed to the worker
/// it is read-only; the worker drops it once every per-property
/// `MergeTask` derived from it has completed.
#[derive(Clone)]
pub struct MemTable {
    map: Arc<SkipMap<InternalKey, Bytes>>,
    approximate_size: Arc<AtomicUsize>,
}

impl MemTable {
    pub fn create() -> Self {
        Self {
            map: Arc::new(SkipMap::new()),
            approximate_size: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn append(&self, key: InternalKey, value: &[u8]) {
        let estimated_size = crate::key::ENCODED_LEN + value.len();
        self.map.insert(key, Bytes::copy_from_slice(value));
        self.approximate_size
            .fetch_add(estimated_size, Ordering::Relaxed);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn approximate_size(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }

    /// The smallest `startTime` present in the buffer. A same-level
    /// rewrite's new `startTime` must not exceed any key it actually
    /// contains, including keys contributed by this memtable, so this
    /// floor feeds that bound directly.
    pub fn min_start_time(&self) -> Option<StartTime> {
        self.map.iter().map(|e| e.key().start_time).min()
    }

    /// A forward iterator over every entry, in comparator order.
    pub fn scan(&self) -> MemTableIterator {
        let mut iter = MemTableIteratorBuilder {
            map: self.map.clone(),
            iter_builder: |map| map.range((Bound::Unbounded, Bound::Unbounded)),
            item: (InternalKey::invalid(), Bytes::new()),
        }
        .build();
        iter.next().expect("MemTableIterator::next is infallible");
        iter
    }

    /// Splits the buffer into one `MemTable` per distinct `propertyId`,
    /// preserving relative order within each property (the source is
    /// already sorted, and this partition is stable).
    pub fn partition_by_property(&self) -> Vec<(PropertyId, MemTable)> {
        let mut partitions: Vec<(PropertyId, MemTable)> = Vec::new();
        for entry in self.map.iter() {
            let property_id = entry.key().property_id;
            let slot = match partitions.last_mut() {
                Some((id, table)) if *id == property_id => table,
                _ => {
                    partitions.push((property_id, MemTable::create()));
                    &mut partitions.last_mut().unwrap().1
                }
            };
            slot.append(*entry.key(), entry.value());
        }
        partitions
    }
}

type SkipMapRangeIter<'a> = crossbeam_skiplist::map::Range<
    'a,
    InternalKey,
    (Bound<InternalKey>, Bound<InternalKey>),
    InternalKey,
    Bytes,
>;

#[self_referencing]
pub struct MemTableIterator {
    map: Arc<SkipMap<InternalKey, Bytes>>,
    #[borrows(map)]
    #[not_covariant]
    iter: SkipMapRangeIter<'this>,
    item: (InternalKey, Bytes),
}

impl MemTableIterator {
    fn entry_to_item(entry: Option<Entry<'_, InternalKey, Bytes>>) -> (InternalKey, Bytes) {
        entry
            .map(|e| (*e.key(), e.value().clone()))
            .unwrap_or_else(|| (InternalKey::invalid(), Bytes::new()))
    }
}

impl StorageIterator for MemTableIterator {
    fn key(&self) -> InternalKey {
        self.borrow_item().0
    }

    fn value(&self) -> &[u8] {
        &self.borrow_item().1[..]
    }

    fn is_valid(&self) -> bool {
        self.borrow_item().0.is_valid()
    }

    fn next(&mut self) -> MergeResult<()> {
        let entry = self.with_iter_mut(|iter| MemTableIterator::entry_to_item(iter.next()));
        self.with_mut(|x| *x.item = entry);
        Ok(())
    }
}
