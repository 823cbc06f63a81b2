//! Two-way merge of a participant's overlay buffer with its table, used
//! when a participant's unstable or stable file has late-arriving edits
//! layered on top of it as a separate overlay buffer.
//!
//! Like `MergingIterator`, this does not deduplicate: the buffer is
//! logically "in front of" the table (its edits are later), so on a tied
//! key the buffer's entry is yielded first.

use crate::error::MergeResult;
use crate::iterators::StorageIterator;
use crate::key::InternalKey;

pub struct BufferFileAndTableIterator<A: StorageIterator, B: StorageIterator> {
    buffer: A,
    table: B,
    /// true while the buffer holds the next entry to yield.
    choose_buffer: bool,
}

impl<A: StorageIterator, B: StorageIterator> BufferFileAndTableIterator<A, B> {
    pub fn create(buffer: A, table: B) -> MergeResult<Self> {
        let mut iter = Self {
            buffer,
            table,
            choose_buffer: false,
        };
        iter.pick()?;
        Ok(iter)
    }

    fn pick(&mut self) -> MergeResult<()> {
        self.choose_buffer = match (self.buffer.is_valid(), self.table.is_valid()) {
            (false, _) => false,
            (true, false) => true,
            (true, true) => self.buffer.key() <= self.table.key(),
        };
        Ok(())
    }
}

impl<A: StorageIterator, B: StorageIterator> StorageIterator for BufferFileAndTableIterator<A, B> {
    fn key(&self) -> InternalKey {
        if self.choose_buffer {
            self.buffer.key()
        } else {
            self.table.key()
        }
    }

    fn value(&self) -> &[u8] {
        if self.choose_buffer {
            self.buffer.value()
        } else {
            self.table.value()
        }
    }

    fn is_valid(&self) -> bool {
        self.buffer.is_valid() || self.table.is_valid()
    }

    fn next(&mut self) -> MergeResult<()> {
        if self.choose_buffer {
            self.buffer.next()?;
        } else {
            self.table.next()?;
        }
        self.pick()
    }
}
