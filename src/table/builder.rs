//! Drives a sequence of `BlockBuilder`s into a complete sorted table file:
//! data blocks, an index block, and a footer. Finished blocks stream
//! straight to a `TableWriter` as they fill rather than being buffered in
//! memory until the whole file is ready, so building one new file costs
//! roughly one block's worth of memory regardless of the file's total
//! size.

use super::{encode_index, IndexEntry, TableWriter, MAGIC};
use crate::block::builder::BlockBuilder;
use crate::error::MergeResult;
use crate::key::{InternalKey, StartTime};
use bytes::BufMut;
use std::path::Path;

/// Summary of what `TableBuilder::finish` wrote, used by `MergeTask` to
/// fill in `FileMetaData` and to check that a rewritten file's recorded
/// `startTime` never exceeds the smallest `startTime` it actually
/// contains.
pub struct TableBuildResult {
    pub byte_size: u64,
    pub min_time: Option<StartTime>,
    pub max_time: Option<StartTime>,
    pub entry_count: u64,
}

pub struct TableBuilder {
    writer: TableWriter,
    block: BlockBuilder,
    block_size: usize,
    restart_interval: usize,
    index: Vec<IndexEntry>,
    block_last_key: Option<InternalKey>,
    min_time: Option<StartTime>,
    max_time: Option<StartTime>,
    entry_count: u64,
}

impl TableBuilder {
    pub fn new(path: &Path, block_size: usize, restart_interval: usize) -> MergeResult<Self> {
        Ok(Self {
            writer: TableWriter::create(path)?,
            block: BlockBuilder::new(block_size, restart_interval),
            block_size,
            restart_interval,
            index: Vec::new(),
            block_last_key: None,
            min_time: None,
            max_time: None,
            entry_count: 0,
        })
    }

    /// Keys passed in must already be globally sorted — the caller is
    /// expected to be a `MergingIterator` over already-sorted inputs.
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> MergeResult<()> {
        self.block.add(key, value);
        self.block_last_key = Some(*key);
        self.entry_count += 1;
        self.min_time = Some(match self.min_time {
            Some(current) => current.min(key.start_time),
            None => key.start_time,
        });
        self.max_time = Some(match self.max_time {
            Some(current) => current.max(key.start_time),
            None => key.start_time,
        });

        if self.block.estimated_size() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> MergeResult<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let finished = std::mem::replace(
            &mut self.block,
            BlockBuilder::new(self.block_size, self.restart_interval),
        );
        let last_key = self
            .block_last_key
            .take()
            .expect("block_last_key set alongside every add");
        let encoded = finished.finish().encode();
        let offset = self.writer.size() as u32;
        let length = encoded.len() as u32;
        self.writer.write_all(&encoded)?;
        let checksum = crc32fast::hash(&encoded);
        self.writer.write_all(&checksum.to_be_bytes())?;
        self.index.push(IndexEntry {
            last_key,
            offset,
            length,
        });
        Ok(())
    }

    /// Flushes any pending block, emits the index block, and writes the
    /// footer. Returns the table's final byte size and the observed
    /// (min, max) startTime across all entries added.
    pub fn finish(mut self) -> MergeResult<TableBuildResult> {
        self.flush_block()?;
        let index_offset = self.writer.size();
        let index_bytes = encode_index(&self.index);
        self.writer.write_all(&index_bytes)?;

        let mut footer = Vec::with_capacity(24);
        footer.put_u64(index_offset);
        footer.put_u64(index_bytes.len() as u64);
        footer.put_u64(MAGIC);
        self.writer.write_all(&footer)?;

        let byte_size = self.writer.finish()?;
        Ok(TableBuildResult {
            byte_size,
            min_time: self.min_time,
            max_time: self.max_time,
            entry_count: self.entry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    #[test]
    fn builds_a_table_readable_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.prop");
        let mut builder = TableBuilder::new(&path, 64, 2).unwrap();
        let entries = [
            (InternalKey::new(1, 1, 30), b"a".to_vec()),
            (InternalKey::new(1, 1, 20), b"bb".to_vec()),
            (InternalKey::new(1, 2, 5), b"ccc".to_vec()),
        ];
        for (key, value) in &entries {
            builder.add(key, value).unwrap();
        }
        let result = builder.finish().unwrap();
        assert_eq!(result.entry_count, 3);
        assert_eq!(result.min_time, Some(5));
        assert_eq!(result.max_time, Some(30));

        let table = Table::open(&path, 1).unwrap();
        assert!(table.num_blocks() >= 1);
        let mut decoded = Vec::new();
        for idx in 0..table.num_blocks() {
            let block = table.read_block(idx).unwrap();
            let mut iter = crate::block::iterator::BlockIterator::create_and_seek_to_first(
                std::sync::Arc::new(block),
            );
            while iter.is_valid() {
                decoded.push((iter.key(), iter.value().to_vec()));
                iter.next();
            }
        }
        let expected: Vec<_> = entries.into_iter().collect();
        assert_eq!(decoded, expected);
    }
}
