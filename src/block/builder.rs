use super::{get_varint, put_varint, Block};
use crate::key::InternalKey;

/// Builds a block: appends (key, value) pairs into a growable buffer,
/// recording a restart point every `restart_interval` entries.
///
/// `sharedPrefixLen` is always 0: internal keys are fixed width and a
/// same-level rewrite patches bytes in place, so prefix compression is
/// disabled to keep record offsets stable under that kind of in-place
/// edit. The restart-interval bookkeeping is kept anyway: it bounds the
/// scan distance a lookup has to walk from the nearest restart point.
pub struct BlockBuilder {
    data: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    entries_since_restart: usize,
    block_size: usize,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(block_size: usize, restart_interval: usize) -> Self {
        Self {
            data: Vec::new(),
            restarts: Vec::new(),
            restart_interval: restart_interval.max(1),
            entries_since_restart: 0,
            block_size,
            finished: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.restarts.is_empty() && self.data.is_empty()
    }

    /// Estimated encoded size of the block if `finish()`ed right now.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.restarts.len() * super::SIZEOF_U32 + super::SIZEOF_U32
    }

    pub fn target_size(&self) -> usize {
        self.block_size
    }

    /// Appends one entry. Keys must arrive in non-decreasing comparator
    /// order; calling `add` after `finish` panics.
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) {
        assert!(!self.finished, "add called after finish");

        if self.entries_since_restart == 0 {
            self.restarts.push(self.data.len() as u32);
        }

        let key_bytes = key.encode();
        // sharedPrefixLen is always 0: see module doc.
        put_varint(&mut self.data, 0);
        put_varint(&mut self.data, key_bytes.len() as u64);
        put_varint(&mut self.data, value.len() as u64);
        self.data.extend_from_slice(&key_bytes);
        self.data.extend_from_slice(value);

        self.entries_since_restart += 1;
        if self.entries_since_restart >= self.restart_interval {
            self.entries_since_restart = 0;
        }
    }

    /// Finalizes the block and returns it. Idempotent on a builder that is
    /// never reused: callers must `reset()` (or construct a new builder)
    /// before adding further entries.
    pub fn finish(mut self) -> Block {
        self.finished = true;
        Block {
            data: self.data,
            restarts: self.restarts,
        }
    }

    /// Clears all state and re-seeds restart point 0, so the builder can
    /// be reused for the next block without reallocating.
    pub fn reset(&mut self) {
        self.data.clear();
        self.restarts.clear();
        self.entries_since_restart = 0;
        self.finished = false;
    }
}

/// Decodes one entry at `buf`, returning `(shared, key, value, bytes_read)`.
/// Shared is always 0 in this implementation but is still parsed, so the
/// on-disk framing stays compatible with a future prefix-compressing
/// writer.
pub(crate) fn decode_entry(buf: &[u8]) -> (usize, InternalKey, &[u8], usize) {
    let mut cursor = buf;
    let start_len = cursor.len();
    let shared = get_varint(&mut cursor) as usize;
    let non_shared = get_varint(&mut cursor) as usize;
    let value_len = get_varint(&mut cursor) as usize;
    let key_bytes = &cursor[..non_shared];
    cursor = &cursor[non_shared..];
    let value = &cursor[..value_len];
    let consumed = start_len - cursor.len() + value_len;
    (shared, InternalKey::decode(key_bytes), value, consumed)
}
