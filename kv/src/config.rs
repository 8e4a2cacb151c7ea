//! Transaction-layer configuration. Field shape follows the teacher's
//! CLI config pattern (a plain struct with a `Default` impl) adapted
//! into the library now that the CLI itself is dropped.

/// Isolation level selectable via `set_isolation_level` (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// TicToc as specified: the commit_ts linearly orders transactions.
    #[default]
    Serializable,
    /// Biases every read's observed `wts` forward by 1 before folding
    /// it into `commit_ts` (spec.md §4.5 "Isolation").
    SiloStyle,
}

/// Configuration for a transactional handle (`engine_handle::TxnEngine`).
#[derive(Clone, Debug)]
pub struct TxnConfig {
    /// log2 of the timestamp cache's slot count.
    pub tsc_capacity_log2: u32,
    pub isolation: IsolationLevel,
    /// Upper bound on entries in one transaction's read/write set.
    pub max_rws_entries: usize,
    /// Concurrency-control-only mode: `Transaction::lookup` skips the
    /// KV engine round trip, still exercising TSC attach/load and RWS
    /// bookkeeping. Never the default; for benchmarking the validator
    /// without storage I/O.
    pub bypass_storage_reads: bool,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            tsc_capacity_log2: 16,
            isolation: IsolationLevel::Serializable,
            max_rws_entries: 256,
            bypass_storage_reads: false,
        }
    }
}
