//! Tunables for the merge/compaction core, gathered into one struct so
//! every tunable the merge path reads has a single, documented home
//! instead of scattered constants.

/// Unstable slots per property, fixed by invariant 1 in the data model but
/// kept as a named constant so the invariant reads as a check against it
/// rather than a bare literal scattered through the merge path.
pub const MAX_UNSTABLE_SLOTS: usize = 5;

#[derive(Clone, Debug)]
pub struct MergeEngineOptions {
    /// Target size, in bytes, of one data block before a new one is
    /// started. Defaults to 4 KiB.
    pub block_size: usize,
    /// Restart-point interval for `BlockBuilder`: one restart offset is
    /// recorded every `restart_interval` entries.
    pub restart_interval: usize,
    /// Soft target size, in bytes, for one sorted table file.
    pub target_file_size: usize,
    /// Capacity, in number of open tables, of the `TableCache`.
    pub table_cache_capacity: u64,
}

impl Default for MergeEngineOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024,
            restart_interval: 16,
            target_file_size: 2 * 1024 * 1024,
            table_cache_capacity: 256,
        }
    }
}
