//! The programmatic surface applications use: create/open/close,
//! register_thread/deregister_thread, begin/commit/abort, and
//! set_isolation_level (spec.md §4.6, §6).

use crate::cache::TimestampCache;
use crate::commit::{self, CommitOutcome};
use crate::config::{IsolationLevel, TxnConfig};
use crate::error::{CResult, Error};
use crate::storage::engine::Engine;
use crate::transaction::Transaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Wraps a KV engine with the timestamp cache and configuration the
/// transactional layer needs. The engine itself only supports
/// single-threaded use (see `storage::engine::Engine`), so concurrent
/// transactions serialize on it the same way the teacher's MVCC layer
/// wraps its storage engine in a `Mutex` -- the lock-freedom this
/// protocol provides is at the TSC/validation layer, not KV I/O.
pub struct TxnEngine<E: Engine> {
    engine: Mutex<E>,
    tsc: TimestampCache,
    config: Mutex<TxnConfig>,
    registered_threads: AtomicUsize,
}

impl<E: Engine> TxnEngine<E> {
    /// Wraps `engine`, installing the transactional merge behavior
    /// (already baked into the engine's `set()`, see `storage::log_cask`).
    pub fn create(engine: E, config: TxnConfig) -> Self {
        let tsc = TimestampCache::new(config.tsc_capacity_log2);
        Self { engine: Mutex::new(engine), tsc, config: Mutex::new(config), registered_threads: AtomicUsize::new(0) }
    }

    /// As `create`, on existing storage -- the engine itself already
    /// recovered its state when it was opened.
    pub fn open(engine: E, config: TxnConfig) -> Self {
        Self::create(engine, config)
    }

    /// Drains, closes the KV engine and frees the TSC.
    pub fn close(self) -> CResult<()> {
        self.engine.into_inner().map_err(|_| poison_err())?.flush()
    }

    pub fn register_thread(&self) {
        self.registered_threads.fetch_add(1, Ordering::SeqCst);
    }

    pub fn deregister_thread(&self) -> CResult<()> {
        if self.registered_threads.fetch_sub(1, Ordering::SeqCst) == 0 {
            self.registered_threads.store(0, Ordering::SeqCst);
            return Err(Error::UsageError("deregister_thread called with none registered".into()));
        }
        Ok(())
    }

    pub fn set_isolation_level(&self, level: IsolationLevel) {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).isolation = level;
    }

    /// Zeroes a fresh transaction record.
    pub fn begin(&self) -> Transaction {
        let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        Transaction::begin(&config)
    }

    pub fn insert(&self, txn: &mut Transaction, key: &[u8], value: Vec<u8>) -> CResult<()> {
        txn.insert(&self.tsc, key, value)
    }

    pub fn update(&self, txn: &mut Transaction, key: &[u8], value: Vec<u8>) -> CResult<()> {
        txn.update(&self.tsc, key, value)
    }

    pub fn delete(&self, txn: &mut Transaction, key: &[u8]) -> CResult<()> {
        txn.delete(&self.tsc, key)
    }

    pub fn lookup(&self, txn: &mut Transaction, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let mut engine = self.engine.lock().map_err(|_| poison_err())?;
        txn.lookup(&self.tsc, &mut *engine, key)
    }

    /// Always returns success, per spec.md §6.
    pub fn abort(&self, txn: Transaction) -> CResult<()> {
        let mut engine = self.engine.lock().map_err(|_| poison_err())?;
        txn.abort(&self.tsc, &mut *engine)
    }

    pub fn commit(&self, txn: Transaction) -> CResult<CommitOutcome> {
        let mut engine = self.engine.lock().map_err(|_| poison_err())?;
        commit::commit(txn, &self.tsc, &mut *engine)
    }
}

fn poison_err() -> Error {
    Error::Internal("storage engine mutex poisoned".into())
}

/// Convenience for sharing one handle across threads, mirroring how
/// the teacher's MVCC layer is used from its CLI session handler.
pub type SharedTxnEngine<E> = Arc<TxnEngine<E>>;
