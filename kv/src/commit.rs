//! The TicToc commit validator: sort, lock, raise commit_ts, validate
//! reads, install writes, release (spec.md §4.5).

use crate::cache::TimestampCache;
use crate::config::IsolationLevel;
use crate::error::CResult;
use crate::rwset::RwEntry;
use crate::storage::engine::Engine;
use crate::timestamp::Word;
use crate::transaction::Transaction;
use crate::tuple::{MessageClass, TupleHeader};
use std::time::Duration;

/// Why a transaction aborted. Both variants map to spec.md §7's
/// `abort-conflict` / `abort-locked`; kept distinct here because
/// they're logged differently and it costs nothing to retain which
/// validation step actually failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// A read's row was overwritten between read and commit.
    Conflict,
    /// A concurrent transaction is about to install a conflicting
    /// write over a row this transaction read.
    Locked,
}

/// The result of a commit attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(u64),
    Aborted(AbortReason),
}

impl CommitOutcome {
    /// The spec.md §6 literal contract for callers porting from the C
    /// API: 0 on commit, -1 on abort.
    pub fn commit_code(&self) -> i32 {
        match self {
            CommitOutcome::Committed(_) => 0,
            CommitOutcome::Aborted(_) => -1,
        }
    }
}

/// Runs the commit protocol for `txn` against `tsc`/`engine`, consuming
/// the transaction either way (a committed or aborted transaction is
/// done; the caller begins a fresh one to retry).
pub fn commit<E: Engine>(
    txn: Transaction,
    tsc: &TimestampCache,
    engine: &mut E,
) -> CResult<CommitOutcome> {
    // SiloStyle biases every read's contribution to the commit_ts seed
    // by 1 (spec.md §4.5); it must not leak into the read's recorded
    // wts, which commit validation below compares for equality against
    // the cell's real wts.
    let silo_bias = if txn.isolation() == IsolationLevel::SiloStyle { 1 } else { 0 };
    let rws = txn.into_rws();
    let mut entries = rws.into_entries();

    // 1. Partition into read set and write set, seeding commit_ts from
    // every observed read.
    let mut commit_ts: u64 = 0;
    let mut write_idx: Vec<usize> = Vec::new();
    let mut read_idx: Vec<usize> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if entry.local_write.is_some() {
            write_idx.push(i);
        }
        if entry.is_read {
            read_idx.push(i);
            commit_ts = commit_ts.max(entry.observed_wts + silo_bias);
        }
    }

    // 2. Sort W by key for a global lock acquisition order.
    write_idx.sort_by(|&a, &b| entries[a].key.cmp(&entries[b].key));

    // 3. Lock W, no-wait: on any CAS failure release everything taken
    // so far, sleep ~1us, and restart from scratch.
    'relock: loop {
        let mut locked: Vec<usize> = Vec::with_capacity(write_idx.len());
        for &i in &write_idx {
            let cell = entries[i].tsc_cell.as_ref().expect("writes always attach a cell");
            let current = cell.load();
            if current.lock_bit || cell.cas(current, current.with_lock_bit(true)).is_err() {
                for &j in &locked {
                    let cell = entries[j].tsc_cell.as_ref().unwrap();
                    let current = cell.load();
                    let _ = cell.cas(current, current.with_lock_bit(false));
                }
                log::debug!("no-wait lock acquisition failed, retrying");
                std::thread::sleep(Duration::from_micros(1));
                continue 'relock;
            }
            locked.push(i);
        }
        break;
    }

    // From here on, release_all() must run on every exit path.
    let release_all = |entries: &[RwEntry]| {
        for &i in &write_idx {
            let cell = entries[i].tsc_cell.as_ref().unwrap();
            let current = cell.load();
            let _ = cell.cas(current, current.with_lock_bit(false));
        }
    };

    // 3b. Reconcile each locked write's cell against its stored header.
    // The timestamp cache evicts a key's cell the instant every
    // referencing transaction releases it (cache::get_and_remove), so a
    // transaction that writes a key blindly -- never calling `lookup`
    // first -- can be handed a fresh Word::ZERO cell by insert_and_get
    // even though the key's last committed write carries a much higher
    // wts on disk. Folding the stored header into the cell here, while
    // it's locked and storage can't change underneath us, keeps
    // commit_ts monotone regardless of what eviction already happened.
    for &i in &write_idx {
        let cell = entries[i].tsc_cell.as_ref().unwrap();
        if let Some(record) = engine.get(&entries[i].key)? {
            if let Ok((header, _)) = TupleHeader::decode(&record) {
                loop {
                    let current = cell.load();
                    let desired = Word {
                        lock_bit: current.lock_bit,
                        wts: current.wts.max(header.wts),
                        delta: current.delta.max(header.delta),
                    };
                    if desired == current || cell.cas(current, desired).is_ok() {
                        break;
                    }
                }
            }
        }
    }

    // 4. Raise commit_ts from writes: the new write must order strictly
    // after the last observed reader of the previous version.
    for &i in &write_idx {
        let cell = entries[i].tsc_cell.as_ref().unwrap();
        let current = cell.load();
        commit_ts = commit_ts.max(current.rts() + 1);
    }

    // 5. Validate R.
    let mut abort: Option<AbortReason> = None;
    'validate: for &i in &read_idx {
        let r_wts = entries[i].observed_wts;
        let r_rts = entries[i].observed_rts;
        if r_rts >= commit_ts {
            continue;
        }
        let in_write_set = write_idx.contains(&i);
        let cell = entries[i].tsc_cell.as_ref().unwrap();

        loop {
            let v1 = cell.load();
            if v1.wts != r_wts {
                abort = Some(AbortReason::Conflict);
                break 'validate;
            }
            if v1.rts() <= commit_ts && v1.lock_bit && !in_write_set {
                abort = Some(AbortReason::Locked);
                break 'validate;
            }
            if v1.rts() <= commit_ts {
                let desired = Word { lock_bit: v1.lock_bit, wts: v1.wts, delta: commit_ts - v1.wts };
                match cell.cas(v1, desired) {
                    Ok(()) => break,
                    Err(_) => continue,
                }
            } else {
                break;
            }
        }
    }

    if let Some(reason) = abort {
        release_all(&entries);
        log::debug!("transaction aborted: {reason:?}");
        return Ok(CommitOutcome::Aborted(reason));
    }

    // 6. Install W.
    for &i in &write_idx {
        let write = entries[i].local_write.clone().expect("write_idx only contains writes");
        let header = TupleHeader::new(write.class, commit_ts, 0);
        let record = header.encode(&write.payload);

        match write.class {
            MessageClass::Delete => engine.delete(&entries[i].key)?,
            _ => engine.set(&entries[i].key, record)?,
        }

        let cell = entries[i].tsc_cell.as_ref().unwrap();
        let current = cell.load();
        let _ = cell.cas(current, Word { lock_bit: false, delta: 0, wts: commit_ts });
    }

    // 7. Release: drop all TSC refcounts (this may trigger eviction
    // writeback for entries that reach refcount zero).
    for entry in entries.drain(..) {
        tsc.get_and_remove(&entry.key, engine)?;
    }

    Ok(CommitOutcome::Committed(commit_ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TimestampCache;
    use crate::config::TxnConfig;
    use crate::storage::memory::Memory;
    use crate::transaction::Transaction;

    #[test]
    fn commit_of_a_single_insert_installs_the_value() {
        let tsc = TimestampCache::new(8);
        let mut engine = Memory::new();
        let mut txn = Transaction::begin(&TxnConfig::default());
        txn.insert(&tsc, b"k", b"v1".to_vec()).unwrap();

        let outcome = commit(txn, &tsc, &mut engine).unwrap();
        let CommitOutcome::Committed(commit_ts) = outcome else { panic!("expected commit") };
        assert_eq!(outcome.commit_code(), 0);

        let stored = engine.get(b"k").unwrap().unwrap();
        let (header, payload) = TupleHeader::decode(&stored).unwrap();
        assert_eq!(payload, b"v1");
        assert_eq!(header.wts, commit_ts);
    }

    #[test]
    fn write_write_conflict_second_committer_sees_higher_commit_ts() {
        let tsc = TimestampCache::new(8);
        let mut engine = Memory::new();

        let mut txn1 = Transaction::begin(&TxnConfig::default());
        txn1.insert(&tsc, b"k", b"v1".to_vec()).unwrap();
        let outcome1 = commit(txn1, &tsc, &mut engine).unwrap();
        let CommitOutcome::Committed(ts1) = outcome1 else { panic!("expected commit") };

        let mut txn2 = Transaction::begin(&TxnConfig::default());
        txn2.update(&tsc, b"k", b"v2".to_vec()).unwrap();
        let outcome2 = commit(txn2, &tsc, &mut engine).unwrap();
        let CommitOutcome::Committed(ts2) = outcome2 else { panic!("expected commit") };

        assert!(ts2 > ts1);
    }

    #[test]
    fn stale_read_aborts_on_commit() {
        let tsc = TimestampCache::new(8);
        let mut engine = Memory::new();

        let mut writer = Transaction::begin(&TxnConfig::default());
        writer.insert(&tsc, b"k", b"v0".to_vec()).unwrap();
        commit(writer, &tsc, &mut engine).unwrap();

        let mut reader = Transaction::begin(&TxnConfig::default());
        reader.lookup(&tsc, &mut engine, b"k").unwrap();

        let mut interleaved_writer = Transaction::begin(&TxnConfig::default());
        interleaved_writer.update(&tsc, b"k", b"v1".to_vec()).unwrap();
        let outcome = commit(interleaved_writer, &tsc, &mut engine).unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed(_)));

        let reader_outcome = commit(reader, &tsc, &mut engine).unwrap();
        assert!(matches!(reader_outcome, CommitOutcome::Aborted(_)));
    }

    #[test]
    fn read_only_transaction_commits_without_writes() {
        let tsc = TimestampCache::new(8);
        let mut engine = Memory::new();
        let mut txn = Transaction::begin(&TxnConfig::default());
        txn.lookup(&tsc, &mut engine, b"missing").unwrap();
        assert!(matches!(commit(txn, &tsc, &mut engine).unwrap(), CommitOutcome::Committed(_)));
    }

    #[test]
    fn read_your_write_merge_is_visible_after_commit() {
        let tsc = TimestampCache::new(8);
        let mut engine = Memory::new();

        let mut txn = Transaction::begin(&TxnConfig::default());
        txn.insert(&tsc, b"k", b"v1".to_vec()).unwrap();
        assert_eq!(txn.lookup(&tsc, &mut engine, b"k").unwrap(), Some(b"v1".to_vec()));
        txn.update(&tsc, b"k", b"v2".to_vec()).unwrap();
        assert_eq!(txn.lookup(&tsc, &mut engine, b"k").unwrap(), Some(b"v2".to_vec()));
        assert!(matches!(commit(txn, &tsc, &mut engine).unwrap(), CommitOutcome::Committed(_)));

        let mut reader = Transaction::begin(&TxnConfig::default());
        assert_eq!(reader.lookup(&tsc, &mut engine, b"k").unwrap(), Some(b"v2".to_vec()));
        reader.abort(&tsc, &mut engine).unwrap();
    }

    /// Invariant 2 (monotone timestamps) regression test. Each of these
    /// updates writes blindly -- never calling `lookup` -- so its TSC
    /// cell comes straight out of `insert_and_get`, which hands back a
    /// fresh `Word::ZERO` cell once the previous committer's cell has
    /// been evicted. Without reconciling against the stored header
    /// before raising commit_ts, every one of these would commit at
    /// ts=1 instead of strictly increasing.
    #[test]
    fn sequential_blind_updates_produce_strictly_increasing_wts_and_final_value() {
        let tsc = TimestampCache::new(8);
        let mut engine = Memory::new();

        let mut insert_txn = Transaction::begin(&TxnConfig::default());
        insert_txn.insert(&tsc, b"k", b"v0".to_vec()).unwrap();
        let CommitOutcome::Committed(ts0) = commit(insert_txn, &tsc, &mut engine).unwrap() else {
            panic!("expected commit")
        };

        let mut last_ts = ts0;
        let mut last_payload = b"v0".to_vec();
        for payload in [b"v1".to_vec(), b"v2".to_vec(), b"v3".to_vec()] {
            let mut txn = Transaction::begin(&TxnConfig::default());
            txn.update(&tsc, b"k", payload.clone()).unwrap();
            let CommitOutcome::Committed(ts) = commit(txn, &tsc, &mut engine).unwrap() else {
                panic!("expected commit")
            };
            assert!(ts > last_ts, "wts must strictly increase: {ts} <= {last_ts}");
            last_ts = ts;
            last_payload = payload;
        }

        let stored = engine.get(b"k").unwrap().unwrap();
        let (header, payload) = TupleHeader::decode(&stored).unwrap();
        assert_eq!(header.wts, last_ts);
        assert_eq!(payload, last_payload);
    }

    /// Scenario 2: a read-only commit can raise a key's delta (and thus
    /// its rts) for a later, lower-commit_ts reader without aborting
    /// either side.
    #[test]
    fn read_only_transactions_extend_delta_and_both_commit() {
        let tsc = TimestampCache::new(8);
        let mut engine = Memory::new();

        let mut k_writer = Transaction::begin(&TxnConfig::default());
        k_writer.insert(&tsc, b"k", b"v0".to_vec()).unwrap();
        commit(k_writer, &tsc, &mut engine).unwrap();

        // Raise "high"'s wts above k's via a chain of blind updates, so
        // a transaction reading both keys seeds a commit_ts above k's
        // own wts and has to extend k's delta to cover it.
        let mut high_writer = Transaction::begin(&TxnConfig::default());
        high_writer.insert(&tsc, b"high", b"h0".to_vec()).unwrap();
        commit(high_writer, &tsc, &mut engine).unwrap();
        for payload in [b"h1".to_vec(), b"h2".to_vec()] {
            let mut txn = Transaction::begin(&TxnConfig::default());
            txn.update(&tsc, b"high", payload).unwrap();
            commit(txn, &tsc, &mut engine).unwrap();
        }

        let mut t1 = Transaction::begin(&TxnConfig::default());
        t1.lookup(&tsc, &mut engine, b"k").unwrap();

        let mut t2 = Transaction::begin(&TxnConfig::default());
        t2.lookup(&tsc, &mut engine, b"k").unwrap();
        t2.lookup(&tsc, &mut engine, b"high").unwrap();

        let CommitOutcome::Committed(ts2) = commit(t2, &tsc, &mut engine).unwrap() else {
            panic!("expected commit")
        };
        let CommitOutcome::Committed(ts1) = commit(t1, &tsc, &mut engine).unwrap() else {
            panic!("expected commit")
        };

        // The commit point of every reader must fall within the
        // version's validity window (wts <= commit_ts <= rts).
        let stored = engine.get(b"k").unwrap().unwrap();
        let (header, _) = TupleHeader::decode(&stored).unwrap();
        let rts = header.wts + header.delta;
        assert!(header.delta > 0, "t2's higher commit_ts must have extended k's delta");
        assert!(header.wts <= ts1 && ts1 <= rts);
        assert!(header.wts <= ts2 && ts2 <= rts);
    }

    /// Scenario 3: two transactions write the same two keys in the
    /// same sort order; one always loses the race for the first lock,
    /// releases nothing, sleeps, and retries, but neither deadlocks and
    /// both eventually commit.
    #[test]
    fn write_write_no_wait_both_transactions_eventually_commit() {
        let tsc = std::sync::Arc::new(TimestampCache::new(8));
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));

        fn run(tsc: &TimestampCache, barrier: &std::sync::Barrier, value: Vec<u8>) -> CommitOutcome {
            let mut engine = Memory::new();
            let mut txn = Transaction::begin(&TxnConfig::default());
            txn.insert(tsc, b"a", value.clone()).unwrap();
            txn.insert(tsc, b"b", value).unwrap();
            barrier.wait();
            commit(txn, tsc, &mut engine).unwrap()
        }

        let tsc2 = tsc.clone();
        let barrier2 = barrier.clone();
        let t1 = std::thread::spawn(move || run(&tsc2, &barrier2, b"t1".to_vec()));
        let outcome2 = run(&tsc, &barrier, b"t2".to_vec());
        let outcome1 = t1.join().unwrap();

        assert!(matches!(outcome1, CommitOutcome::Committed(_)));
        assert!(matches!(outcome2, CommitOutcome::Committed(_)));
    }
}
