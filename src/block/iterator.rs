use std::sync::Arc;

use super::builder::decode_entry;
use super::Block;
use crate::key::InternalKey;

/// Forward-only cursor over one block's entries, in encoded order.
/// Seeking to an arbitrary key by binary-searching the restart array is a
/// read-path concern this type doesn't need: merging only ever scans a
/// block start to finish.
pub struct BlockIterator {
    block: Arc<Block>,
    key: Option<InternalKey>,
    value_range: (usize, usize),
    next_offset: usize,
}

impl BlockIterator {
    fn new(block: Arc<Block>) -> Self {
        Self {
            block,
            key: None,
            value_range: (0, 0),
            next_offset: 0,
        }
    }

    pub fn create_and_seek_to_first(block: Arc<Block>) -> Self {
        let mut iter = Self::new(block);
        iter.seek_to_first();
        iter
    }

    pub fn key(&self) -> InternalKey {
        self.key.expect("key() called on invalid iterator")
    }

    pub fn value(&self) -> &[u8] {
        &self.block.data[self.value_range.0..self.value_range.1]
    }

    pub fn is_valid(&self) -> bool {
        self.key.is_some()
    }

    pub fn seek_to_first(&mut self) {
        self.next_offset = 0;
        self.advance();
    }

    pub fn next(&mut self) {
        self.advance();
    }

    fn advance(&mut self) {
        if self.next_offset >= self.block.data.len() {
            self.key = None;
            return;
        }
        let entry_bytes = &self.block.data[self.next_offset..];
        let (_shared, key, value, consumed) = decode_entry(entry_bytes);
        let value_start = self.next_offset + (consumed - value.len());
        let value_end = value_start + value.len();
        self.key = Some(key);
        self.value_range = (value_start, value_end);
        self.next_offset += consumed;
    }
}
