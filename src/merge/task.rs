//! The per-property unit of merge work: picks which existing files
//! participate, streams the merged result into a new file outside any
//! lock, then flips metadata under the exclusive lock, then reclaims the
//! obsolete files it replaced. Building the new file is the slow, I/O-bound
//! part; keeping it outside any lock means readers and other properties'
//! merges are never blocked on one property's file write.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::warn;

use crate::config::{MergeEngineOptions, MAX_UNSTABLE_SLOTS};
use crate::error::{MergeError, MergeResult};
use crate::filename;
use crate::iterators::buffer_file::BufferFileAndTableIterator;
use crate::iterators::latest_value::TableLatestValueIterator;
use crate::iterators::merging::MergingIterator;
use crate::iterators::StorageIterator;
use crate::key::{PropertyId, StartTime};
use crate::mem_table::MemTable;
use crate::meta::{FileMetaData, PropertyMetaData};
use crate::table::builder::{TableBuildResult, TableBuilder};
use crate::table::cache::{TableCache, TableLocator};
use crate::table::iterator::TableIterator;

/// What a same-level rewrite vs. a promotion need to know to finish the
/// job once the merged file has been built: fewer than the unstable slot
/// limit stays a same-level rewrite into the next free slot; reaching the
/// limit promotes the merged result into a new stable file instead.
enum Outcome {
    SameLevelRewrite {
        new_slot: usize,
    },
    Promotion {
        new_stable_id: u64,
        had_stable: bool,
        previous_largest_time: StartTime,
    },
}

pub struct MergeTask {
    property_id: PropertyId,
    dir: PathBuf,
    cache: TableCache,
    options: MergeEngineOptions,
    memtable: MemTable,
    /// Unstable participants, slots 0..k-1, in ascending slot order.
    participants: Vec<FileMetaData>,
    /// Overlay buffer for each participant, parallel to `participants`.
    participant_buffers: Vec<Option<FileMetaData>>,
    /// The property's current stable tail and its overlay, read only
    /// during a promotion: the new stable file must carry forward each
    /// entity's latest value from the outgoing tail, not just the merged
    /// unstable data.
    latest_stable: Option<(FileMetaData, Option<FileMetaData>)>,
    outcome: Outcome,
    output_path: PathBuf,
    build: Option<TableBuildResult>,
}

impl MergeTask {
    /// Picks which existing files this task will fold in. `meta` is a
    /// snapshot taken under the shared lock; the returned task reads
    /// metadata again, for real, only inside `update_meta_info` once the
    /// exclusive lock is held, so a concurrent metadata change between
    /// planning and commit is caught rather than silently overwritten.
    pub fn create(
        property_id: PropertyId,
        dir: PathBuf,
        memtable: MemTable,
        meta: &PropertyMetaData,
        cache: TableCache,
        options: MergeEngineOptions,
    ) -> MergeResult<Self> {
        let participants = meta.unstable_participants()?;
        let k = participants.len();
        let participant_buffers = (0..k)
            .map(|slot| meta.unstable_buffers.get(&slot).copied())
            .collect();

        let (outcome, output_path, latest_stable) = if k < MAX_UNSTABLE_SLOTS {
            let output_path = filename::unstable_table_path(&dir, k);
            (Outcome::SameLevelRewrite { new_slot: k }, output_path, None)
        } else {
            let new_stable_id = meta.peek_next_stable_id();
            let output_path = filename::stable_table_path(&dir, new_stable_id);
            let had_stable = meta.latest_stable().is_some();
            let previous_largest_time = meta.latest_stable().map(|f| f.largest_time).unwrap_or(-1);
            let latest_stable = meta.latest_stable().map(|f| {
                let overlay = meta.stable_buffers.get(&f.file_number).copied();
                (*f, overlay)
            });
            (
                Outcome::Promotion {
                    new_stable_id,
                    had_stable,
                    previous_largest_time,
                },
                output_path,
                latest_stable,
            )
        };

        Ok(Self {
            property_id,
            dir,
            cache,
            options,
            memtable,
            participants,
            participant_buffers,
            latest_stable,
            outcome,
            output_path,
            build: None,
        })
    }

    fn open_table(&self, locator: TableLocator, path: &std::path::Path) -> MergeResult<TableIterator> {
        let table = self.cache.get_or_open(self.property_id, locator, path)?;
        TableIterator::create_and_seek_to_first(table)
    }

    /// Builds the merged input list in priority order — the memtable
    /// first since it holds the newest writes, then the latest-stable
    /// overlay collapsed to one value per entity when this is a
    /// promotion, then the unstable participants in ascending slot order
    /// — and streams it through a fresh `TableBuilder`. Runs with no lock
    /// held; any I/O error here leaves the output file partial and no
    /// metadata change, so the caller can abandon the task and the next
    /// cycle re-attempts, overwriting this same deterministic name.
    pub fn build_new_file(&mut self) -> MergeResult<()> {
        let mut iters: Vec<Box<dyn StorageIterator>> = Vec::with_capacity(2 + self.participants.len());
        iters.push(Box::new(self.memtable.scan()));

        if let Outcome::Promotion { .. } = self.outcome {
            if let Some((stable_meta, buffer_meta)) = &self.latest_stable {
                let table_iter = self.open_table(
                    TableLocator::Stable(stable_meta.file_number),
                    &filename::stable_table_path(&self.dir, stable_meta.file_number),
                )?;
                let source: Box<dyn StorageIterator> = if let Some(buf_meta) = buffer_meta {
                    let buf_iter = self.open_table(
                        TableLocator::StableBuffer(buf_meta.file_number),
                        &filename::stable_buffer_path(&self.dir, stable_meta.file_number),
                    )?;
                    Box::new(BufferFileAndTableIterator::create(buf_iter, table_iter)?)
                } else {
                    Box::new(table_iter)
                };
                iters.push(Box::new(TableLatestValueIterator::create(source)?));
            }
        }

        for slot in 0..self.participants.len() {
            let table_iter = self.open_table(
                TableLocator::Unstable(slot),
                &filename::unstable_table_path(&self.dir, slot),
            )?;
            let entry: Box<dyn StorageIterator> = if self.participant_buffers[slot].is_some() {
                let buf_iter = self.open_table(
                    TableLocator::UnstableBuffer(slot),
                    &filename::unstable_buffer_path(&self.dir, slot),
                )?;
                Box::new(BufferFileAndTableIterator::create(buf_iter, table_iter)?)
            } else {
                Box::new(table_iter)
            };
            iters.push(entry);
        }

        let mut merged = MergingIterator::<dyn StorageIterator>::create(iters);
        let mut builder = TableBuilder::new(
            &self.output_path,
            self.options.block_size,
            self.options.restart_interval,
        )?;
        while merged.is_valid() {
            builder.add(&merged.key(), merged.value())?;
            merged.next()?;
        }
        self.build = Some(builder.finish()?);
        Ok(())
    }

    /// Must be called under the system-wide exclusive metadata lock, after
    /// `build_new_file` has succeeded. Mutates `properties` in place; the
    /// caller (`SystemMeta::update_and_persist`) force-persists the whole
    /// registry once after every task in the batch has run.
    pub fn update_meta_info(
        &self,
        properties: &mut BTreeMap<PropertyId, PropertyMetaData>,
    ) -> MergeResult<()> {
        let build = self
            .build
            .as_ref()
            .ok_or_else(|| MergeError::InvariantViolation(
                "update_meta_info called before build_new_file".into(),
            ))?;
        let entry = properties.entry(self.property_id).or_default();

        match &self.outcome {
            Outcome::SameLevelRewrite { new_slot } => {
                for slot in 0..*new_slot {
                    entry.unstable.remove(&slot);
                    entry.unstable_buffers.remove(&slot);
                }

                let participants_min = self.participants.iter().map(|p| p.smallest_time).min();
                let memtable_min = self.memtable.min_start_time();
                // Take the min across both participants and the incoming
                // memtable, not just participants: a same-level rewrite
                // with zero participants still carries a smallestTime from
                // the memtable alone.
                let start_time = match (participants_min, memtable_min) {
                    (Some(a), Some(b)) => a.min(b),
                    (Some(a), None) => a,
                    (None, Some(b)) => b,
                    (None, None) => {
                        return Err(MergeError::InvariantViolation(
                            "same-level rewrite with no participants and an empty memtable".into(),
                        ))
                    }
                };
                let min_time = build.min_time.ok_or_else(|| {
                    MergeError::InvariantViolation("merged output produced no entries".into())
                })?;
                if start_time > min_time {
                    return Err(MergeError::InvariantViolation(format!(
                        "same-level rewrite startTime {start_time} exceeds observed minTime {min_time}"
                    )));
                }

                let meta = FileMetaData {
                    file_number: *new_slot as u64,
                    byte_size: build.byte_size,
                    smallest_time: start_time,
                    largest_time: build.max_time.unwrap_or(start_time),
                };
                entry.unstable.insert(*new_slot, meta);
            }
            Outcome::Promotion {
                new_stable_id,
                had_stable,
                previous_largest_time,
            } => {
                for slot in 0..MAX_UNSTABLE_SLOTS {
                    entry.unstable.remove(&slot);
                    entry.unstable_buffers.remove(&slot);
                }

                let allocated = entry.next_stable_id();
                if allocated != *new_stable_id {
                    return Err(MergeError::InvariantViolation(format!(
                        "stable id {new_stable_id} planned outside the lock does not match {allocated} allocated under it"
                    )));
                }
                let start_time = if *had_stable {
                    previous_largest_time + 1
                } else {
                    0
                };
                let meta = FileMetaData {
                    file_number: *new_stable_id,
                    byte_size: build.byte_size,
                    smallest_time: start_time,
                    largest_time: build.max_time.unwrap_or(start_time),
                };
                entry.stable.push(meta);
            }
        }
        Ok(())
    }

    /// Runs outside the lock, after metadata has been force-persisted, so
    /// a crash before this point leaves the old files referenced by
    /// nothing but still on disk rather than referenced-but-deleted.
    /// Failures here are logged and swallowed: an orphaned file is
    /// reclaimable by a later garbage sweep, not a correctness problem.
    pub fn delete_obsolete_files(&self) {
        for (slot, _participant) in self.participants.iter().enumerate() {
            self.cache.evict(self.property_id, TableLocator::Unstable(slot));
            let path = filename::unstable_table_path(&self.dir, slot);
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(?path, %err, "failed to delete obsolete unstable table");
            }
            if self.participant_buffers[slot].is_some() {
                self.cache
                    .evict(self.property_id, TableLocator::UnstableBuffer(slot));
                let buf_path = filename::unstable_buffer_path(&self.dir, slot);
                if let Err(err) = std::fs::remove_file(&buf_path) {
                    warn!(?buf_path, %err, "failed to delete obsolete unstable overlay buffer");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::InternalKey;
    use std::collections::BTreeMap as StdBTreeMap;

    fn write_table(path: &std::path::Path, entries: &[(InternalKey, &[u8])]) -> TableBuildResult {
        let mut builder = TableBuilder::new(path, 4096, 16).unwrap();
        for (key, value) in entries {
            builder.add(key, value).unwrap();
        }
        builder.finish().unwrap()
    }

    #[test]
    fn simple_flush_from_an_empty_property_creates_slot_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TableCache::new(8);
        let options = MergeEngineOptions::default();

        let memtable = MemTable::create();
        memtable.append(InternalKey::new(1, 7, 10), b"a");

        let meta = PropertyMetaData::default();
        let mut task = MergeTask::create(1, dir.path().to_path_buf(), memtable, &meta, cache, options)
            .unwrap();
        task.build_new_file().unwrap();

        let mut properties: StdBTreeMap<PropertyId, PropertyMetaData> = StdBTreeMap::new();
        task.update_meta_info(&mut properties).unwrap();

        let updated = &properties[&1];
        assert_eq!(updated.unstable.len(), 1);
        let slot0 = &updated.unstable[&0];
        assert_eq!(slot0.smallest_time, 10);
        assert_eq!(slot0.largest_time, 10);

        task.delete_obsolete_files();
        assert!(dir.path().join("unstable-0.prop").exists());
    }

    #[test]
    fn same_level_rewrite_merges_two_participants_and_removes_them() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TableCache::new(8);
        let options = MergeEngineOptions::default();

        write_table(
            &dir.path().join("unstable-0.prop"),
            &[(InternalKey::new(1, 7, 10), b"a")],
        );
        write_table(
            &dir.path().join("unstable-1.prop"),
            &[(InternalKey::new(1, 8, 20), b"b")],
        );

        let mut meta = PropertyMetaData::default();
        meta.unstable.insert(
            0,
            FileMetaData {
                file_number: 0,
                byte_size: 1,
                smallest_time: 10,
                largest_time: 10,
            },
        );
        meta.unstable.insert(
            1,
            FileMetaData {
                file_number: 1,
                byte_size: 1,
                smallest_time: 20,
                largest_time: 20,
            },
        );

        let memtable = MemTable::create();
        memtable.append(InternalKey::new(1, 9, 30), b"c");

        let mut task = MergeTask::create(
            1,
            dir.path().to_path_buf(),
            memtable,
            &meta,
            cache,
            options,
        )
        .unwrap();
        task.build_new_file().unwrap();

        let mut properties: StdBTreeMap<PropertyId, PropertyMetaData> = StdBTreeMap::new();
        properties.insert(1, meta);
        task.update_meta_info(&mut properties).unwrap();

        let updated = &properties[&1];
        assert!(!updated.unstable.contains_key(&0));
        assert!(!updated.unstable.contains_key(&1));
        let slot2 = &updated.unstable[&2];
        assert_eq!(slot2.smallest_time, 10);
        assert_eq!(slot2.largest_time, 30);

        task.delete_obsolete_files();
        assert!(!dir.path().join("unstable-0.prop").exists());
        assert!(!dir.path().join("unstable-1.prop").exists());
        assert!(dir.path().join("unstable-2.prop").exists());
    }

    #[test]
    fn five_participants_trigger_promotion_and_clear_unstable_slots() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TableCache::new(8);
        let options = MergeEngineOptions::default();

        let mut meta = PropertyMetaData::default();
        for slot in 0..MAX_UNSTABLE_SLOTS {
            let t = (slot as i32 + 1) * 10;
            write_table(
                &dir.path().join(format!("unstable-{slot}.prop")),
                &[(InternalKey::new(1, slot as u64, t), b"v")],
            );
            meta.unstable.insert(
                slot,
                FileMetaData {
                    file_number: slot as u64,
                    byte_size: 1,
                    smallest_time: t,
                    largest_time: t,
                },
            );
        }

        let memtable = MemTable::create();
        memtable.append(InternalKey::new(1, 99, 60), b"newest");

        let mut task = MergeTask::create(
            1,
            dir.path().to_path_buf(),
            memtable,
            &meta,
            cache,
            options,
        )
        .unwrap();
        task.build_new_file().unwrap();

        let mut properties: StdBTreeMap<PropertyId, PropertyMetaData> = StdBTreeMap::new();
        properties.insert(1, meta);
        task.update_meta_info(&mut properties).unwrap();

        let updated = &properties[&1];
        assert!(updated.unstable.is_empty());
        assert_eq!(updated.stable.len(), 1);
        let stable = &updated.stable[0];
        assert_eq!(stable.smallest_time, 0);
        assert_eq!(stable.largest_time, 60);

        task.delete_obsolete_files();
        for slot in 0..MAX_UNSTABLE_SLOTS {
            assert!(!dir.path().join(format!("unstable-{slot}.prop")).exists());
        }
    }

    #[test]
    fn promotion_carries_forward_the_latest_stable_value_per_entity() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TableCache::new(8);
        let options = MergeEngineOptions::default();

        write_table(
            &dir.path().join("stable-0.prop"),
            &[
                (InternalKey::new(1, 1, 5), b"carried-forward"),
                (InternalKey::new(1, 1, 2), b"older"),
            ],
        );

        let mut meta = PropertyMetaData::default();
        meta.stable.push(FileMetaData {
            file_number: 0,
            byte_size: 1,
            smallest_time: 0,
            largest_time: 5,
        });
        for slot in 0..MAX_UNSTABLE_SLOTS {
            write_table(
                &dir.path().join(format!("unstable-{slot}.prop")),
                &[(InternalKey::new(1, 2, slot as i32), b"v")],
            );
            meta.unstable.insert(
                slot,
                FileMetaData {
                    file_number: slot as u64,
                    byte_size: 1,
                    smallest_time: slot as i32,
                    largest_time: slot as i32,
                },
            );
        }

        let memtable = MemTable::create();
        memtable.append(InternalKey::new(1, 3, 50), b"fresh");

        let mut task = MergeTask::create(
            1,
            dir.path().to_path_buf(),
            memtable,
            &meta,
            cache,
            options,
        )
        .unwrap();
        task.build_new_file().unwrap();
        let build = task.build.as_ref().unwrap();
        // memtable(1) + carried-forward latest-value(1, entity 1) + 5 unstable entries.
        assert_eq!(build.entry_count, 7);
    }
}
