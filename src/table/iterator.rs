//! Forward-only iterator over one table's contents, crossing block
//! boundaries transparently. There's no key-seek here: a merge always
//! scans a participant table start to finish, never looks up a single
//! key within it.

use std::sync::Arc;

use super::Table;
use crate::block::iterator::BlockIterator;
use crate::error::MergeResult;
use crate::iterators::StorageIterator;
use crate::key::InternalKey;

pub struct TableIterator {
    table: Arc<Table>,
    block_iter: Option<BlockIterator>,
    block_idx: usize,
}

impl TableIterator {
    pub fn create_and_seek_to_first(table: Arc<Table>) -> MergeResult<Self> {
        let mut iter = Self {
            table,
            block_iter: None,
            block_idx: 0,
        };
        iter.load_block(0)?;
        Ok(iter)
    }

    fn load_block(&mut self, block_idx: usize) -> MergeResult<()> {
        if block_idx >= self.table.num_blocks() {
            self.block_iter = None;
            return Ok(());
        }
        let block = Arc::new(self.table.read_block(block_idx)?);
        self.block_iter = Some(BlockIterator::create_and_seek_to_first(block));
        self.block_idx = block_idx;
        Ok(())
    }
}

impl StorageIterator for TableIterator {
    fn key(&self) -> InternalKey {
        self.block_iter.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.block_iter.as_ref().unwrap().value()
    }

    fn is_valid(&self) -> bool {
        self.block_iter.as_ref().is_some_and(|b| b.is_valid())
    }

    fn next(&mut self) -> MergeResult<()> {
        self.block_iter.as_mut().unwrap().next();
        if !self.block_iter.as_ref().unwrap().is_valid() {
            self.load_block(self.block_idx + 1)?;
        }
        Ok(())
    }
}
