//! Error taxonomy for the merge/compaction core.
//!
//! A bounded, pattern-matchable set of variants rather than one opaque
//! error type: the worker's retry/panic/exit behavior differs per failure
//! kind (a transient write failure is retried next cycle, a corrupted
//! metadata file is fatal), so every fallible call in the merge path
//! propagates this same `MergeError` with `?` instead of erasing the
//! distinction behind a boxed `dyn Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    /// Disk full, write failure, or any other I/O error encountered while
    /// building a new file or deleting obsolete ones. Logged and the
    /// current task abandoned; the next worker cycle re-attempts.
    #[error("transient I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk metadata file could not be parsed or force-persisted.
    /// Fatal: the worker must panic and the process restart from the
    /// write-ahead log.
    #[error("metadata corruption: {0}")]
    MetaCorruption(String),

    /// The worker thread was asked to stop while blocked on its queue.
    #[error("merge worker interrupted")]
    Interrupted,

    /// An internal invariant (participant prefix contiguity, same-level
    /// startTime bound, stable file time-range contiguity) was violated.
    /// Indicates a metadata/data inconsistency that cannot be safely
    /// proceeded through.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type MergeResult<T> = std::result::Result<T, MergeError>;
