//! Benchmarks for trie insertion and root computation.

use alloy_primitives::{keccak256, Bytes, B256};
use alloy_trie::Nibbles;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use monad_mpt::{MemoryNodeStore, TrieNode};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_entries(count: usize) -> Vec<(B256, Bytes)> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            let key: [u8; 32] = rng.gen();
            (keccak256(key), Bytes::from(key.to_vec()))
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_insert");
    for size in [64usize, 512, 4096] {
        let entries = random_entries(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &entries, |b, entries| {
            let store = MemoryNodeStore::default();
            b.iter(|| {
                let mut node = TrieNode::Empty;
                for (key, value) in entries {
                    node.insert(&Nibbles::unpack(key), value.clone(), &store).unwrap();
                }
                node
            });
        });
    }
    group.finish();
}

fn bench_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_root");
    for size in [64usize, 512, 4096] {
        let entries = random_entries(size);
        let store = MemoryNodeStore::default();
        let mut node = TrieNode::Empty;
        for (key, value) in &entries {
            node.insert(&Nibbles::unpack(key), value.clone(), &store).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &node, |b, node| {
            b.iter(|| node.root());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_root);
criterion_main!(benches);
