//! Per-property and system-wide metadata: what files exist, their time
//! ranges, and the unstable-slot/stable-file bookkeeping that backs a
//! property's on-disk layout. Persisted as a whole-state snapshot written
//! to a temp file and renamed into place, rather than an append-only
//! journal: a merge cycle's metadata updates span several properties and
//! must become durable as a single atomic unit — either every update in
//! the batch is visible after a crash, or none are — and a rename gives
//! that for free where an append-only log would need its own commit
//! marker.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::BufMut;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::MAX_UNSTABLE_SLOTS;
use crate::error::{MergeError, MergeResult};
use crate::key::{PropertyId, StartTime};

/// Identifies one on-disk sorted table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    pub file_number: u64,
    pub byte_size: u64,
    pub smallest_time: StartTime,
    pub largest_time: StartTime,
}

/// Per-property file bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyMetaData {
    /// Slot id ∈ {0..MAX_UNSTABLE_SLOTS-1} -> table. The occupied slots
    /// always form the prefix {0, 1, ..., k-1}: a new unstable file always
    /// lands in the lowest free slot, so a gap can only mean corruption.
    pub unstable: BTreeMap<usize, FileMetaData>,
    /// Strictly increasing by startTime: each stable file picks up exactly
    /// where the previous one's time range left off.
    pub stable: Vec<FileMetaData>,
    /// Overlay delta for an unstable slot, if any late edits arrived.
    pub unstable_buffers: BTreeMap<usize, FileMetaData>,
    /// Overlay delta for a stable file, keyed by stable file id.
    pub stable_buffers: BTreeMap<u64, FileMetaData>,
    next_stable_id: u64,
}

impl PropertyMetaData {
    /// The contiguous prefix of occupied unstable slots. `Err` if the
    /// occupied set is not a prefix of {0..MAX_UNSTABLE_SLOTS}: a
    /// conforming writer always fills the lowest free slot next, so a gap
    /// can only be reached through a corrupted or hand-edited metadata
    /// file.
    pub fn unstable_participants(&self) -> MergeResult<Vec<FileMetaData>> {
        let mut participants = Vec::with_capacity(self.unstable.len());
        for slot in 0..MAX_UNSTABLE_SLOTS {
            match self.unstable.get(&slot) {
                Some(meta) => participants.push(*meta),
                None => break,
            }
        }
        if participants.len() != self.unstable.len() {
            return Err(MergeError::MetaCorruption(format!(
                "unstable slots are not a contiguous prefix: {:?}",
                self.unstable.keys().collect::<Vec<_>>()
            )));
        }
        Ok(participants)
    }

    pub fn next_stable_id(&mut self) -> u64 {
        let id = self.next_stable_id;
        self.next_stable_id += 1;
        id
    }

    /// The id `next_stable_id()` would hand out, without allocating it.
    /// `MergeTask::create` uses this to pick a deterministic output
    /// filename outside the metadata lock; `update_meta_info` later calls
    /// the mutating `next_stable_id()` on the live registry and asserts it
    /// matches. The id is deterministic given the current metadata, so a
    /// task abandoned mid-build and re-attempted next cycle recomputes
    /// and overwrites the same output filename rather than leaking one.
    pub fn peek_next_stable_id(&self) -> u64 {
        self.next_stable_id
    }

    pub fn latest_stable(&self) -> Option<&FileMetaData> {
        self.stable.last()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SystemMetaState {
    properties: BTreeMap<PropertyId, PropertyMetaData>,
}

/// The system-wide metadata registry, guarded by a single readers/writer
/// lock: readers take the shared side for one lookup, the merge worker
/// takes the exclusive side only around a batch of metadata edits and the
/// persist that follows. Passed to the worker as an explicit handle
/// rather than reached through an ambient singleton, so the store's
/// lifetime is tied to who holds this value, not to process-global state.
pub struct SystemMeta {
    path: PathBuf,
    inner: RwLock<SystemMetaState>,
}

impl SystemMeta {
    /// Loads metadata from `path` if it exists, otherwise starts empty.
    pub fn open(path: &Path) -> MergeResult<Self> {
        let state = if path.exists() {
            Self::load(path)?
        } else {
            SystemMetaState::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(state),
        })
    }

    fn load(path: &Path) -> MergeResult<SystemMetaState> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        if bytes.len() < 4 {
            return Err(MergeError::MetaCorruption(
                "metadata file shorter than its checksum".into(),
            ));
        }
        let split = bytes.len() - 4;
        let checksum = u32::from_be_bytes(bytes[split..].try_into().unwrap());
        if crc32fast::hash(&bytes[..split]) != checksum {
            return Err(MergeError::MetaCorruption(
                "metadata file checksum mismatch".into(),
            ));
        }
        serde_json::from_slice(&bytes[..split])
            .map_err(|e| MergeError::MetaCorruption(format!("malformed metadata file: {e}")))
    }

    /// A read-locked snapshot of one property's metadata, cloned out so
    /// the lock is held only for the duration of this call.
    pub fn snapshot(&self, property_id: PropertyId) -> PropertyMetaData {
        self.inner
            .read()
            .properties
            .get(&property_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Runs `mutate` under the exclusive lock and force-persists the
    /// whole registry before returning, so every property updated by
    /// `mutate` becomes durable as one atomic unit. `MergeWorker` calls
    /// this exactly once per cycle, after every per-property
    /// `MergeTask::update_meta_info` but before any file deletion. If
    /// `mutate` fails (an invariant violation or metadata corruption
    /// surfaced by one of the batched tasks), nothing is persisted and
    /// the error propagates to the worker, which treats it as fatal and
    /// panics rather than risk running further with a torn update.
    pub fn update_and_persist(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<PropertyId, PropertyMetaData>) -> MergeResult<()>,
    ) -> MergeResult<()> {
        let mut guard = self.inner.write();
        mutate(&mut guard.properties)?;
        self.persist(&guard)
    }

    fn persist(&self, state: &SystemMetaState) -> MergeResult<()> {
        let mut buf = serde_json::to_vec(state)
            .map_err(|e| MergeError::MetaCorruption(format!("failed to serialize metadata: {e}")))?;
        let checksum = crc32fast::hash(&buf);
        buf.put_u32(checksum);

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| MergeError::MetaCorruption(format!("failed to open temp metadata file: {e}")))?;
        tmp.write_all(&buf)
            .map_err(|e| MergeError::MetaCorruption(format!("failed to write temp metadata file: {e}")))?;
        tmp.sync_all()
            .map_err(|e| MergeError::MetaCorruption(format!("failed to fsync temp metadata file: {e}")))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| MergeError::MetaCorruption(format!("failed to install metadata file: {e}")))?;
        Ok(())
    }
}

impl SystemMetaState {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
        }
    }
}
