//! begin / insert / update / delete / lookup / abort -- the operations
//! a transaction supports before it reaches `commit` (spec.md §4.4).

use crate::cache::TimestampCache;
use crate::config::{IsolationLevel, TxnConfig};
use crate::error::CResult;
use crate::rwset::ReadWriteSet;
use crate::storage::engine::Engine;
use crate::timestamp::Word;
use crate::tuple::{MessageClass, TupleHeader};

/// An in-progress transaction: an ordered read/write set plus the
/// handful of settings that affect how its operations behave.
pub struct Transaction {
    rws: ReadWriteSet,
    isolation: IsolationLevel,
    bypass_storage_reads: bool,
}

impl Transaction {
    /// Zeroes a fresh transaction record; no global state is touched.
    pub fn begin(config: &TxnConfig) -> Self {
        Self {
            rws: ReadWriteSet::new(config.max_rws_entries),
            isolation: config.isolation,
            bypass_storage_reads: config.bypass_storage_reads,
        }
    }

    fn write(
        &mut self,
        tsc: &TimestampCache,
        key: &[u8],
        class: MessageClass,
        payload: Vec<u8>,
    ) -> CResult<()> {
        self.attach_tsc_cell(tsc, key, false)?;
        self.rws.record_write(key, class, payload)
    }

    pub fn insert(&mut self, tsc: &TimestampCache, key: &[u8], value: Vec<u8>) -> CResult<()> {
        self.write(tsc, key, MessageClass::Insert, value)
    }

    pub fn update(&mut self, tsc: &TimestampCache, key: &[u8], value: Vec<u8>) -> CResult<()> {
        self.write(tsc, key, MessageClass::Update, value)
    }

    /// Deletes encode as a distinguished definitive message, carrying
    /// no payload.
    pub fn delete(&mut self, tsc: &TimestampCache, key: &[u8]) -> CResult<()> {
        self.write(tsc, key, MessageClass::Delete, vec![])
    }

    /// Reads a key, returning its current value (or `None` if deleted
    /// or absent). Returns the transaction's own pending write for the
    /// key without touching storage (read-your-writes).
    pub fn lookup<E: Engine>(
        &mut self,
        tsc: &TimestampCache,
        engine: &mut E,
        key: &[u8],
    ) -> CResult<Option<Vec<u8>>> {
        self.attach_tsc_cell(tsc, key, true)?;

        if let Some(existing) = self.rws.iter().find(|e| e.key == key).and_then(|e| e.local_write.as_ref()) {
            return Ok(match existing.class {
                MessageClass::Delete => None,
                _ => Some(existing.payload.clone()),
            });
        }

        let cell = self
            .rws
            .iter()
            .find(|e| e.key == key)
            .and_then(|e| e.tsc_cell.clone())
            .expect("attach_tsc_cell always populates tsc_cell");

        let mut word = loop {
            let word = cell.load();
            if !word.lock_bit {
                break word;
            }
            std::hint::spin_loop();
        };

        if self.bypass_storage_reads {
            let entry = self.rws.iter_mut().find(|e| e.key == key).unwrap();
            entry.observed_wts = word.wts;
            entry.observed_rts = word.rts();
            return Ok(None);
        }

        let stored = engine.get(key)?;
        let (header_wts, header_delta, payload) = match &stored {
            Some(record) => {
                let (header, payload) = TupleHeader::decode(record)?;
                (header.wts, header.delta, if header.is_ts_update { None } else { Some(payload.to_vec()) })
            }
            None => (0, 0, None),
        };

        // Adopt max(header, cell) into the cell via CAS loop.
        loop {
            let desired = Word {
                lock_bit: word.lock_bit,
                wts: header_wts.max(word.wts),
                delta: header_delta.max(word.delta),
            };
            if desired == word {
                break;
            }
            match cell.cas(word, desired) {
                Ok(()) => {
                    word = desired;
                    break;
                }
                Err(current) => word = current,
            }
        }

        // The true observed wts, unbiased: commit's validation equality
        // check (`v1.wts != r_wts`) compares this against the cell's
        // real wts, so any SiloStyle bias must be applied later, only
        // when folding reads into commit_ts (see `commit::commit`).
        let entry = self.rws.iter_mut().find(|e| e.key == key).unwrap();
        entry.observed_wts = word.wts;
        entry.observed_rts = word.rts();

        Ok(payload)
    }

    /// Releases all TSC references and frees the RWS. Always succeeds.
    pub fn abort<E: Engine>(self, tsc: &TimestampCache, engine: &mut E) -> CResult<()> {
        for entry in self.rws.into_entries() {
            tsc.get_and_remove(&entry.key, engine)?;
        }
        Ok(())
    }

    fn attach_tsc_cell(&mut self, tsc: &TimestampCache, key: &[u8], is_read: bool) -> CResult<()> {
        let entry = self.rws.get_or_create(key, is_read)?;
        if entry.tsc_cell.is_none() {
            entry.tsc_cell = Some(tsc.insert_and_get(key)?);
        }
        Ok(())
    }

    pub(crate) fn rws(&self) -> &ReadWriteSet {
        &self.rws
    }

    /// The isolation level this transaction began under. Commit needs
    /// this to decide whether to bias `commit_ts` seeding by 1 for
    /// `SiloStyle` (spec.md §4.5); it must not affect what gets stored
    /// as `observed_wts` in the read/write set.
    pub(crate) fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub(crate) fn into_rws(self) -> ReadWriteSet {
        self.rws
    }
}
