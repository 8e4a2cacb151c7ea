//! `tictoc-kv` layers a TicToc-style optimistic-concurrency
//! transactional front end over a small embedded, log-structured
//! key-value engine: lock-free reads, no central lock manager, and
//! commit timestamps encoded directly inside stored values. [Author
//! fengyang]
//!
//! ## Getting started
//!
//! ```rust
//! use tictoc_kv::config::TxnConfig;
//! use tictoc_kv::engine_handle::TxnEngine;
//! use tictoc_kv::storage::memory::Memory;
//!
//! fn main() {
//!     run().unwrap();
//! }
//!
//! fn run() -> Result<(), tictoc_kv::error::Error> {
//!     let handle = TxnEngine::create(Memory::new(), TxnConfig::default());
//!     handle.register_thread();
//!
//!     let mut txn = handle.begin();
//!     handle.insert(&mut txn, b"a", b"1".to_vec())?;
//!     assert_eq!(handle.commit(txn)?.commit_code(), 0);
//!
//!     let mut reader = handle.begin();
//!     assert_eq!(handle.lookup(&mut reader, b"a")?, Some(b"1".to_vec()));
//!     handle.abort(reader)?;
//!
//!     handle.deregister_thread()?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod commit;
pub mod config;
pub mod engine_handle;
pub mod error;
pub mod rwset;
pub mod storage;
pub mod transaction;
pub mod tuple;
pub mod timestamp;
