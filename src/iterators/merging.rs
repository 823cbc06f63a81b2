//! N-way merge over already-sorted iterators, deliberately **without**
//! deduplication: when two iterators produce equal keys, both are
//! yielded, in iterator-list order. Duplicate keys across sources are not
//! an error here — `startTime` is part of the key, so a genuine overwrite
//! and a stale duplicate look identical at this layer. Collapsing them is
//! a decision for whatever later reads the merged file, not for the merge
//! itself.

use std::cmp;
use std::collections::BinaryHeap;

use crate::error::MergeResult;
use crate::iterators::StorageIterator;

struct HeapWrapper<I: StorageIterator>(usize, Box<I>);

impl<I: StorageIterator> PartialEq for HeapWrapper<I> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl<I: StorageIterator> Eq for HeapWrapper<I> {}

impl<I: StorageIterator> PartialOrd for HeapWrapper<I> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<I: StorageIterator> Ord for HeapWrapper<I> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        // min-heap on key, ties broken by ascending list index (earlier
        // iterator == higher priority), both reversed for BinaryHeap's
        // max-heap semantics.
        match self.1.key().cmp(&other.1.key()) {
            cmp::Ordering::Equal => self.0.cmp(&other.0),
            ord => ord,
        }
        .reverse()
    }
}

/// Merges `N` sorted iterators into one sorted stream. Does not
/// deduplicate equal keys: when two iterators are positioned on the same
/// key, the one earlier in the input list is yielded first, then the
/// other on the following `next()`.
pub struct MergingIterator<I: StorageIterator> {
    heap: BinaryHeap<HeapWrapper<I>>,
    current: Option<HeapWrapper<I>>,
}

impl<I: StorageIterator> MergingIterator<I> {
    /// `iters` must be given in priority order: on a tied key, the
    /// iterator earlier in this list is yielded first — the caller lists
    /// its newest source first so ties resolve toward the newest data.
    pub fn create(iters: Vec<Box<I>>) -> Self {
        let mut heap = BinaryHeap::new();
        for (idx, iter) in iters.into_iter().enumerate() {
            if iter.is_valid() {
                heap.push(HeapWrapper(idx, iter));
            }
        }
        let current = heap.pop();
        Self { heap, current }
    }
}

impl<I: StorageIterator> StorageIterator for MergingIterator<I> {
    fn key(&self) -> crate::key::InternalKey {
        self.current
            .as_ref()
            .expect("key() called on invalid iterator")
            .1
            .key()
    }

    fn value(&self) -> &[u8] {
        self.current
            .as_ref()
            .expect("value() called on invalid iterator")
            .1
            .value()
    }

    fn is_valid(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.1.is_valid())
    }

    fn next(&mut self) -> MergeResult<()> {
        let current = self.current.as_mut().expect("next() called on invalid iterator");
        current.1.next()?;

        if !current.1.is_valid() {
            self.current = self.heap.pop();
            return Ok(());
        }

        if let Some(mut top) = self.heap.peek_mut() {
            if *top < *current {
                std::mem::swap(&mut *top, current);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::InternalKey;

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
    fn merges_without_deduplicating_equal_keys() {
        let a = VecIter::new(vec![
            (InternalKey::new(1, 1, 20), b"from-a".to_vec()),
            (InternalKey::new(1, 1, 10), b"a-only".to_vec()),
        ]);
        let b = VecIter::new(vec![(InternalKey::new(1, 1, 20), b"from-b".to_vec())]);

        // `a` is earlier in the list, so on the tied key (1,1,20) it is
        // yielded first.
        let mut merged = MergingIterator::create(vec![Box::new(a), Box::new(b)]);
        let mut out = Vec::new();
        while merged.is_valid() {
            out.push((merged.key(), merged.value().to_vec()));
            merged.next().unwrap();
        }
        assert_eq!(
            out,
            vec![
                (InternalKey::new(1, 1, 20), b"from-a".to_vec()),
                (InternalKey::new(1, 1, 20), b"from-b".to_vec()),
                (InternalKey::new(1, 1, 10), b"a-only".to_vec()),
            ]
        );
    }

    #[test]
    fn empty_input_is_immediately_invalid() {
        let merged: MergingIterator<VecIter> = MergingIterator::create(vec![]);
        assert!(!merged.is_valid());
    }
}
