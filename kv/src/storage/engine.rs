use crate::error::CResult;
use crate::storage::Status;

/// A key/value storage engine, where both keys and values are arbitrary
/// byte strings. Writes are only guaranteed durable after `flush()`.
///
/// Only supports single-threaded use since all methods (including reads)
/// take a mutable reference. The transactional layer wraps each engine
/// in a `Mutex` (see `engine_handle::TxnEngine`) the same way the
/// teacher wraps its storage engine for its MVCC layer.
///
/// Only point operations are exposed: the transactional layer never
/// issues range scans (spec.md §1 Non-goals), so unlike a
/// general-purpose KV engine trait this has no `scan`.
pub trait Engine: std::fmt::Display + Send + Sync {
    /// Deletes a key, or does nothing if it does not exist.
    fn delete(&mut self, key: &[u8]) -> CResult<()>;

    /// Flushes any buffered data to the underlying storage medium.
    fn flush(&mut self) -> CResult<()>;

    /// Gets the raw (tuple-header-prefixed) record for a key, if any.
    fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>>;

    /// Writes a raw (tuple-header-prefixed) record for a key.
    ///
    /// If a record already exists for this key, the engine merges the
    /// two via `crate::tuple::merge` instead of overwriting blindly --
    /// this is the "merge invoked when two records for the same key
    /// meet" moment from spec.md §4.1, modeled here as happening
    /// synchronously on write rather than from a background compactor
    /// (see `storage::log_cask` for why).
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> CResult<()>;

    /// Returns engine status.
    fn status(&mut self) -> CResult<Status>;
}
