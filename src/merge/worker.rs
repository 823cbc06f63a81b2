//! The single background worker per store: an unbounded FIFO of
//! `MemTable`s, drained one at a time, each split by property and handed
//! to a `MergeTask`, with the exclusive metadata lock held only around
//! the batched `update_meta_info` calls. Keeping the lock scope to just
//! that batch means the slow parts — building each property's merged
//! file, deleting the files it replaced — never block a concurrent
//! metadata reader.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, info, instrument, warn};

use crate::config::MergeEngineOptions;
use crate::error::{MergeError, MergeResult};
use crate::key::PropertyId;
use crate::mem_table::MemTable;
use crate::meta::SystemMeta;
use crate::property_store::PropertyStore;
use crate::table::cache::TableCache;

struct MergeWorker {
    root: PathBuf,
    meta: Arc<SystemMeta>,
    cache: TableCache,
    options: MergeEngineOptions,
    receiver: Receiver<MemTable>,
    merging: Arc<AtomicBool>,
}

impl MergeWorker {
    fn property_dir(&self, property_id: PropertyId) -> PathBuf {
        self.root.join(property_id.to_string())
    }

    fn run(self) {
        loop {
            let memtable = match self.receiver.recv() {
                Ok(memtable) => memtable,
                Err(_) => {
                    debug!("merge worker queue closed, exiting");
                    break;
                }
            };

            self.merging.store(true, Ordering::Release);
            if let Err(err) = self.run_cycle(memtable) {
                match err {
                    MergeError::MetaCorruption(_) | MergeError::InvariantViolation(_) => {
                        error!(%err, "fatal error in merge cycle, worker is stopping");
                        self.merging.store(false, Ordering::Release);
                        panic!("merge worker: {err}");
                    }
                    MergeError::Interrupted => {
                        self.merging.store(false, Ordering::Release);
                        break;
                    }
                    MergeError::Io(_) => {
                        warn!(%err, "transient I/O error in merge cycle, will retry next cycle");
                    }
                }
            }
            self.merging.store(false, Ordering::Release);
        }
    }

    /// One full cycle: partition by property, build every task's output
    /// file outside any lock, flip all of their metadata in one batch
    /// under the exclusive lock, then reclaim obsolete files outside the
    /// lock again.
    #[instrument(skip_all)]
    fn run_cycle(&self, memtable: MemTable) -> MergeResult<()> {
        if memtable.is_empty() {
            debug!("discarding empty memtable");
            return Ok(());
        }

        let partitions = memtable.partition_by_property();
        let mut tasks = Vec::with_capacity(partitions.len());
        for (property_id, sub_buffer) in partitions {
            let dir = self.property_dir(property_id);
            std::fs::create_dir_all(&dir)?;
            let snapshot = self.meta.snapshot(property_id);
            let store = PropertyStore::new(property_id, dir, self.cache.clone(), self.options.clone());
            if let Some(mut task) = store.merge(sub_buffer, &snapshot)? {
                task.build_new_file()?;
                tasks.push(task);
            }
        }

        if tasks.is_empty() {
            return Ok(());
        }

        let property_count = tasks.len();
        self.meta.update_and_persist(|properties| {
            for task in &tasks {
                task.update_meta_info(properties)?;
            }
            Ok(())
        })?;

        for task in &tasks {
            task.delete_obsolete_files();
        }
        info!(properties = property_count, "merge cycle completed");
        Ok(())
    }
}

/// The public handle callers use to feed memtables to the worker thread
/// and shut it down: `offer`, `is_merging`, `start`/`interrupt`.
pub struct MergeWorkerHandle {
    sender: Sender<MemTable>,
    merging: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl MergeWorkerHandle {
    /// Spawns the worker thread. `root` holds one subdirectory per
    /// property, named by its numeric id.
    pub fn start(root: PathBuf, meta: Arc<SystemMeta>, options: MergeEngineOptions) -> Self {
        let (sender, receiver) = channel::unbounded();
        let merging = Arc::new(AtomicBool::new(false));
        let cache = TableCache::new(options.table_cache_capacity);
        let worker = MergeWorker {
            root,
            meta,
            cache,
            options,
            receiver,
            merging: merging.clone(),
        };
        let join = thread::Builder::new()
            .name("merge-worker".into())
            .spawn(move || worker.run())
            .expect("failed to spawn merge worker thread");
        Self {
            sender,
            merging,
            join: Mutex::new(Some(join)),
        }
    }

    /// Enqueues a full buffer for the worker to merge. The queue is
    /// unbounded; back-pressure is the write path's responsibility.
    pub fn offer(&self, memtable: MemTable) {
        if self.sender.send(memtable).is_err() {
            warn!("offer called after the merge worker has stopped");
        }
    }

    /// True iff a cycle is in flight or the queue is non-empty.
    pub fn is_merging(&self) -> bool {
        self.merging.load(Ordering::Acquire) || !self.sender.is_empty()
    }

    /// Signals the worker to stop by closing the channel, so `recv`
    /// returns an error once the queue is drained, and joins the thread.
    pub fn interrupt(self) {
        drop(self.sender);
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filename;
    use crate::key::InternalKey;
    use std::sync::Arc;

    fn handle(root: PathBuf) -> MergeWorkerHandle {
        let meta = Arc::new(SystemMeta::open(&filename::metadata_path(&root)).unwrap());
        MergeWorkerHandle::start(root, meta, MergeEngineOptions::default())
    }

    #[test]
    fn offering_an_empty_memtable_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let worker = handle(dir.path().to_path_buf());
        worker.offer(MemTable::create());
        // Give the worker a moment to drain; is_merging settles to false
        // once the cycle (a no-op) completes.
        for _ in 0..200 {
            if !worker.is_merging() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!worker.is_merging());
        worker.interrupt();
    }

    #[test]
    fn one_memtable_spanning_three_properties_runs_one_batched_lock_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let meta_path = filename::metadata_path(dir.path());
        let meta = Arc::new(SystemMeta::open(&meta_path).unwrap());
        let worker = MergeWorkerHandle::start(
            dir.path().to_path_buf(),
            meta.clone(),
            MergeEngineOptions::default(),
        );

        let memtable = MemTable::create();
        memtable.append(InternalKey::new(1, 1, 10), b"p1");
        memtable.append(InternalKey::new(2, 1, 10), b"p2");
        memtable.append(InternalKey::new(3, 1, 10), b"p3");
        worker.offer(memtable);

        for _ in 0..200 {
            if !worker.is_merging() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        worker.interrupt();

        for property_id in [1u32, 2, 3] {
            let snapshot = meta.snapshot(property_id);
            assert_eq!(snapshot.unstable.len(), 1, "property {property_id} should have one slot");
        }
    }
}
