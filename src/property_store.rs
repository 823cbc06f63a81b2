//! Owns one property's directory, its table cache handle, and the
//! merge-engine options it merges under, and ties the generic
//! `MergeTask` machinery to that property's live `PropertyMetaData`.

use std::path::{Path, PathBuf};

use crate::config::MergeEngineOptions;
use crate::error::MergeResult;
use crate::key::PropertyId;
use crate::mem_table::MemTable;
use crate::merge::task::MergeTask;
use crate::meta::PropertyMetaData;
use crate::table::cache::TableCache;

#[derive(Clone)]
pub struct PropertyStore {
    property_id: PropertyId,
    dir: PathBuf,
    cache: TableCache,
    options: MergeEngineOptions,
}

impl PropertyStore {
    pub fn new(
        property_id: PropertyId,
        dir: impl Into<PathBuf>,
        cache: TableCache,
        options: MergeEngineOptions,
    ) -> Self {
        Self {
            property_id,
            dir: dir.into(),
            cache,
            options,
        }
    }

    pub fn property_id(&self) -> PropertyId {
        self.property_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Turns a per-property sub-buffer into a `MergeTask`, or `None` if
    /// the sub-buffer is empty — an empty buffer has nothing to merge and
    /// should leave this property's metadata untouched. `meta` is a
    /// read-locked snapshot of this property's current metadata, taken by
    /// the caller before releasing the shared lock.
    pub fn merge(
        &self,
        sub_buffer: MemTable,
        meta: &PropertyMetaData,
    ) -> MergeResult<Option<MergeTask>> {
        if sub_buffer.is_empty() {
            return Ok(None);
        }
        MergeTask::create(
            self.property_id,
            self.dir.clone(),
            sub_buffer,
            meta,
            self.cache.clone(),
            self.options.clone(),
        )
        .map(Some)
    }
}
