#![allow(dead_code)]

//! A sorted table file: a sequence of checksummed data blocks, an index
//! block, and a fixed-size footer. Opened via a memory map rather than
//! positioned reads, since the merge path only ever scans a table start
//! to finish and never needs a membership filter for point lookups — the
//! temporal key already disambiguates entries by startTime.

pub mod builder;
pub mod cache;
pub mod iterator;

use crate::block::Block;
use crate::error::{MergeError, MergeResult};
use crate::key::{InternalKey, ENCODED_LEN};
use bytes::{Buf, BufMut};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::path::Path;

const FOOTER_LEN: usize = 8 + 8 + 8;
const MAGIC: u64 = 0x54475254_414f5254; // "TGRT AORT" — arbitrary, stable magic.

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub(crate) last_key: InternalKey,
    pub(crate) offset: u32,
    pub(crate) length: u32,
}

fn encode_index(entries: &[IndexEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u32(entries.len() as u32);
    for entry in entries {
        buf.put_slice(&entry.last_key.encode());
        buf.put_u32(entry.offset);
        buf.put_u32(entry.length);
    }
    let checksum = crc32fast::hash(&buf);
    buf.put_u32(checksum);
    buf
}

fn decode_index(buf: &[u8]) -> MergeResult<Vec<IndexEntry>> {
    // Checksum covers everything written before `encode_index` appended the
    // checksum itself, i.e. count + entries — computed over the full buffer
    // here, before `cursor` is advanced past the count field below.
    let checksum = crc32fast::hash(&buf[..buf.len() - 4]);
    let mut cursor = buf;
    let count = cursor.get_u32() as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let last_key = InternalKey::decode(&cursor[..ENCODED_LEN]);
        cursor.advance(ENCODED_LEN);
        let offset = cursor.get_u32();
        let length = cursor.get_u32();
        entries.push(IndexEntry {
            last_key,
            offset,
            length,
        });
    }
    if cursor.get_u32() != checksum {
        return Err(MergeError::MetaCorruption(
            "index block checksum mismatch".into(),
        ));
    }
    Ok(entries)
}

/// An open, memory-mapped sorted table.
pub struct Table {
    mmap: Mmap,
    index: Vec<IndexEntry>,
    file_number: u64,
}

impl Table {
    pub fn open(path: &Path, file_number: u64) -> MergeResult<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < FOOTER_LEN {
            return Err(MergeError::MetaCorruption(format!(
                "table {file_number} shorter than footer"
            )));
        }
        let footer = &mmap[mmap.len() - FOOTER_LEN..];
        let mut footer_cursor = footer;
        let index_offset = footer_cursor.get_u64() as usize;
        let index_len = footer_cursor.get_u64() as usize;
        let magic = footer_cursor.get_u64();
        if magic != MAGIC {
            return Err(MergeError::MetaCorruption(format!(
                "table {file_number} has bad magic"
            )));
        }
        let index_bytes = &mmap[index_offset..index_offset + index_len];
        let index = decode_index(index_bytes)?;
        Ok(Self {
            mmap,
            index,
            file_number,
        })
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    pub fn read_block(&self, block_idx: usize) -> MergeResult<Block> {
        let entry = &self.index[block_idx];
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        let checksum_bytes = &self.mmap[end..end + 4];
        let checksum = u32::from_be_bytes(checksum_bytes.try_into().unwrap());
        let block_bytes = &self.mmap[start..end];
        if crc32fast::hash(block_bytes) != checksum {
            return Err(MergeError::MetaCorruption(format!(
                "table {} block {block_idx} checksum mismatch",
                self.file_number
            )));
        }
        Ok(Block::decode(block_bytes))
    }
}

/// A write handle for a file under construction, flushed and fsynced on
/// `finish()`. Supports repeated appends rather than a single write, so
/// `TableBuilder` can stream blocks to disk as they fill instead of
/// buffering the whole file in memory.
pub(crate) struct TableWriter {
    file: File,
    path: std::path::PathBuf,
    written: u64,
}

impl TableWriter {
    pub(crate) fn create(path: &Path) -> MergeResult<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub(crate) fn write_all(&mut self, bytes: &[u8]) -> MergeResult<()> {
        use std::io::Write;
        self.file.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub(crate) fn size(&self) -> u64 {
        self.written
    }

    pub(crate) fn finish(self) -> MergeResult<u64> {
        self.file.sync_all()?;
        Ok(self.written)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
