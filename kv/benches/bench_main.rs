use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tictoc_kv::config::TxnConfig;
use tictoc_kv::engine_handle::TxnEngine;
use tictoc_kv::storage::memory::Memory;

fn commit_single_key_inserts(c: &mut Criterion) {
    let handle = TxnEngine::create(Memory::new(), TxnConfig::default());
    let mut counter = 0u64;

    c.bench_function("commit single-key insert", |b| {
        b.iter(|| {
            counter += 1;
            let key = counter.to_be_bytes();
            let mut txn = handle.begin();
            handle.insert(&mut txn, black_box(&key), black_box(vec![1, 2, 3])).unwrap();
            handle.commit(txn).unwrap()
        })
    });
}

fn commit_read_your_write(c: &mut Criterion) {
    let handle = TxnEngine::create(Memory::new(), TxnConfig::default());

    c.bench_function("insert then lookup then commit", |b| {
        b.iter(|| {
            let mut txn = handle.begin();
            handle.insert(&mut txn, black_box(b"bench-key"), black_box(vec![1, 2, 3])).unwrap();
            handle.lookup(&mut txn, black_box(b"bench-key")).unwrap();
            handle.commit(txn).unwrap()
        })
    });
}

fn bypass_storage_reads_lookup(c: &mut Criterion) {
    let config = TxnConfig { bypass_storage_reads: true, ..TxnConfig::default() };
    let handle = TxnEngine::create(Memory::new(), config);

    c.bench_function("concurrency-control-only lookup", |b| {
        b.iter(|| {
            let mut txn = handle.begin();
            handle.lookup(&mut txn, black_box(b"bench-key")).unwrap();
            handle.abort(txn).unwrap();
        })
    });
}

criterion_group!(benches, commit_single_key_inserts, commit_read_your_write, bypass_storage_reads_lookup);
criterion_main!(benches);
