//! The per-transaction read/write set (RWS): an unsorted, bounded
//! sequence with at most one entry per key (spec.md invariant 5).

use crate::cache::TscCell;
use crate::error::{CResult, Error};
use crate::tuple::{MessageClass, TupleHeader};
use std::sync::Arc;

/// A write a transaction has buffered locally for a key, not yet
/// installed through the KV engine.
#[derive(Clone, Debug)]
pub struct LocalWrite {
    pub class: MessageClass,
    pub payload: Vec<u8>,
}

/// One entry in a transaction's read/write set.
pub struct RwEntry {
    pub key: Vec<u8>,
    pub is_read: bool,
    pub local_write: Option<LocalWrite>,
    pub tsc_cell: Option<Arc<TscCell>>,
    pub observed_wts: u64,
    pub observed_rts: u64,
}

impl RwEntry {
    fn new(key: Vec<u8>, is_read: bool) -> Self {
        Self {
            key,
            is_read,
            local_write: None,
            tsc_cell: None,
            observed_wts: 0,
            observed_rts: 0,
        }
    }
}

/// Bounded, linearly-scanned read/write set. Linear scan is
/// deliberate: transactions are short, so a scan is cheaper than the
/// bookkeeping a hash index would need (spec.md §4.3).
pub struct ReadWriteSet {
    entries: Vec<RwEntry>,
    max_entries: usize,
}

impl ReadWriteSet {
    pub fn new(max_entries: usize) -> Self {
        Self { entries: Vec::new(), max_entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RwEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RwEntry> {
        self.entries.iter_mut()
    }

    pub fn into_entries(self) -> Vec<RwEntry> {
        self.entries
    }

    /// Finds the existing entry for `key`, or allocates a new one and
    /// appends it. `is_read` is OR-ed cumulatively onto any existing
    /// entry, per spec.md §4.3.
    pub fn get_or_create(&mut self, key: &[u8], is_read: bool) -> CResult<&mut RwEntry> {
        if let Some(idx) = self.entries.iter().position(|e| e.key == key) {
            self.entries[idx].is_read |= is_read;
            return Ok(&mut self.entries[idx]);
        }

        if self.entries.len() >= self.max_entries {
            return Err(Error::ResourceExhausted(format!(
                "read/write set full at {} entries",
                self.max_entries
            )));
        }

        self.entries.push(RwEntry::new(key.to_vec(), is_read));
        Ok(self.entries.last_mut().unwrap())
    }

    /// Installs or merges a local write message for `key`'s entry.
    /// Subsequent writes to the same key inside one transaction combine
    /// via `merge` unless the new write is *definitive* (insert or
    /// delete), in which case it replaces the old one outright.
    pub fn record_write(&mut self, key: &[u8], class: MessageClass, payload: Vec<u8>) -> CResult<()> {
        let entry = self.get_or_create(key, false)?;
        entry.local_write = Some(match (&entry.local_write, class) {
            (Some(_), MessageClass::Insert) | (Some(_), MessageClass::Delete) => {
                LocalWrite { class, payload }
            }
            (Some(existing), MessageClass::Update) => {
                let old = TupleHeader::new(existing.class, 0, 0).encode(&existing.payload);
                let new = TupleHeader::new(class, 0, 0).encode(&payload);
                let merged = crate::tuple::merge(&old, &new)?;
                let (header, merged_payload) = TupleHeader::decode(&merged)?;
                LocalWrite { class: header.class, payload: merged_payload.to_vec() }
            }
            (None, _) => LocalWrite { class, payload },
        });
        Ok(())
    }
}
