use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use jmt_db::{Hash, IterOptions, MemoryStore, MerkleTrie, NodeIterator};

fn random_data(n: usize) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut keys = Vec::with_capacity(n);
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        let mut key = vec![0u8; 32];
        rng.fill_bytes(&mut key);
        let mut value = vec![0u8; 64];
        rng.fill_bytes(&mut value);
        keys.push(key);
        values.push(value);
    }
    (keys, values)
}

fn populated(keys: &[Vec<u8>], values: &[Vec<u8>]) -> (Arc<MemoryStore>, Hash) {
    let store = Arc::new(MemoryStore::new());
    let mut trie = MerkleTrie::new(store.clone());
    for (key, value) in keys.iter().zip(values) {
        trie.update(0, key, value).unwrap();
    }
    let root = trie.commit().unwrap();
    (store, root)
}

fn insert_benchmark(c: &mut Criterion) {
    let (keys_1k, values_1k) = black_box(random_data(1_000));
    let (keys_10k, values_10k) = black_box(random_data(10_000));

    let mut group = c.benchmark_group("Trie insert and commit");
    group.bench_function("insert 1k", |b| {
        b.iter_batched(
            || MerkleTrie::new(Arc::new(MemoryStore::new())),
            |mut trie| {
                for (key, value) in keys_1k.iter().zip(&values_1k) {
                    trie.update(0, key, value).unwrap();
                }
                black_box(trie.commit().unwrap())
            },
            BatchSize::LargeInput,
        );
    });
    group.bench_function("insert 10k", |b| {
        b.iter_batched(
            || MerkleTrie::new(Arc::new(MemoryStore::new())),
            |mut trie| {
                for (key, value) in keys_10k.iter().zip(&values_10k) {
                    trie.update(0, key, value).unwrap();
                }
                black_box(trie.commit().unwrap())
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

fn update_benchmark(c: &mut Criterion) {
    let (keys, values) = black_box(random_data(10_000));
    let (store, root) = populated(&keys, &values);

    c.bench_function("update 100 of 10k at next version", |b| {
        b.iter_batched(
            || MerkleTrie::load(store.clone(), root).unwrap(),
            |mut trie| {
                for key in keys.iter().take(100) {
                    trie.update(1, key, b"updated").unwrap();
                }
                black_box(trie.root_hash().unwrap())
            },
            BatchSize::SmallInput,
        );
    });
}

fn proof_benchmark(c: &mut Criterion) {
    let (keys, values) = black_box(random_data(10_000));
    let (store, root) = populated(&keys, &values);
    let trie = MerkleTrie::load(store, root).unwrap();

    c.bench_function("prove and verify", |b| {
        let mut i = 0;
        b.iter(|| {
            let proof = trie.prove(&keys[i % keys.len()]).unwrap();
            i += 1;
            black_box(jmt_db::verify_proof(&root, Some(&proof)).unwrap())
        });
    });
}

fn iterate_benchmark(c: &mut Criterion) {
    let (keys, values) = black_box(random_data(10_000));
    let (store, root) = populated(&keys, &values);

    c.bench_function("iterate 10k", |b| {
        b.iter(|| {
            let (items, outcome) = NodeIterator::new(store.clone(), root, IterOptions::default())
                .unwrap()
                .start()
                .unwrap()
                .drain();
            assert!(outcome.is_completed());
            black_box(items.len())
        });
    });
}

criterion_group!(
    benches,
    insert_benchmark,
    update_benchmark,
    proof_benchmark,
    iterate_benchmark
);
criterion_main!(benches);
