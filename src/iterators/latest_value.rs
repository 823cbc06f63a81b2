//! Dedup wrapper used only when promoting a property's latest stable file
//! forward into a new one: for each (propertyId, entityId) it yields only
//! the newest record visible in the wrapped iterator, so the promotion
//! carries forward exactly one continuation record per entity instead of
//! that entity's whole history. Every other merge-path iterator in this
//! crate intentionally does not dedupe; this is the one place a reader
//! needs a single, unambiguous "current value" per entity, so it is kept
//! as its own small wrapper rather than a flag on `MergingIterator`.

use crate::error::MergeResult;
use crate::iterators::StorageIterator;
use crate::key::{EntityId, InternalKey, PropertyId};

pub struct TableLatestValueIterator<I: StorageIterator> {
    inner: I,
    last_yielded: Option<(PropertyId, EntityId)>,
}

impl<I: StorageIterator> TableLatestValueIterator<I> {
    pub fn create(inner: I) -> MergeResult<Self> {
        // Entries within an entity are ordered by descending startTime,
        // so the first entry for each entity is already its latest
        // value; nothing to skip on construction.
        let last_yielded = inner.is_valid().then(|| entity_of(&inner));
        Ok(Self {
            inner,
            last_yielded,
        })
    }
}

fn entity_of<I: StorageIterator>(iter: &I) -> (PropertyId, EntityId) {
    let key = iter.key();
    (key.property_id, key.entity_id)
}

impl<I: StorageIterator> StorageIterator for TableLatestValueIterator<I> {
    fn key(&self) -> InternalKey {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn next(&mut self) -> MergeResult<()> {
        let current = self.last_yielded;
        loop {
            self.inner.next()?;
            if !self.inner.is_valid() {
                self.last_yielded = None;
                return Ok(());
            }
            let candidate = entity_of(&self.inner);
            if Some(candidate) != current {
                self.last_yielded = Some(candidate);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecIter {
        entries: Vec<(InternalKey, Vec<u8>)>,
        pos: usize,
    }

    impl VecIter {
        fn new(entries: Vec<(InternalKey, Vec<u8>)>) -> Self {
            Self { entries, pos: 0 }
        }
    }

    impl StorageIterator for VecIter {
        fn key(&self) -> InternalKey {
            self.entries[self.pos].0
        }

        fn value(&self) -> &[u8] {
            &self.entries[self.pos].1
        }

        fn is_valid(&self) -> bool {
            self.pos < self.entries.len()
        }

        fn next(&mut self) -> MergeResult<()> {
            self.pos += 1;
            Ok(())
        }
    }

    #[test]
    fn keeps_only_the_newest_record_per_entity() {
        // (p=1,e=1) has two versions, (p=1,e=2) has one.
        let source = VecIter::new(vec![
            (InternalKey::new(1, 1, 30), b"newest".to_vec()),
            (InternalKey::new(1, 1, 10), b"older".to_vec()),
            (InternalKey::new(1, 2, 5), b"only".to_vec()),
        ]);
        let mut iter = TableLatestValueIterator::create(source).unwrap();
        let mut out = Vec::new();
        while iter.is_valid() {
            out.push((iter.key(), iter.value().to_vec()));
            iter.next().unwrap();
        }
        assert_eq!(
            out,
            vec![
                (InternalKey::new(1, 1, 30), b"newest".to_vec()),
                (InternalKey::new(1, 2, 5), b"only".to_vec()),
            ]
        );
    }
}
