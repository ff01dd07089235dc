//! Criterion benchmarks for tessera-core hashing and Merkle construction.
//!
//! Covers: flat tree construction over raw hashes, witness trees over full
//! transactions, witness commitment validation, and block hashing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tessera_core::hash::Blake3Hasher;
use tessera_core::merkle::{
    build_merkle_tree, build_merkle_tree_from_hashes, build_merkle_tree_from_hashes_with,
    validate_witness_commitment, witness_commitment,
};
use tessera_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Generate `n` deterministic 32-byte hashes.
fn make_hashes(n: usize) -> Vec<Hash256> {
    (0..n)
        .map(|i| {
            let bytes = blake3::hash(&(i as u64).to_le_bytes());
            Hash256(*bytes.as_bytes())
        })
        .collect()
}

fn make_transactions(n: usize) -> Vec<Transaction> {
    (0..n)
        .map(|i| Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    hash: Hash256([(i % 251) as u8; 32]),
                    index: i as u32,
                },
                sequence: u32::MAX,
                sign_script: vec![0u8; 72],
            }],
            outputs: vec![TxOutput {
                amount: 50 * 100_000_000,
                pk_script: vec![0x76; 25],
            }],
            lock_time: 0,
        })
        .collect()
}

fn committed_block(n: usize) -> Block {
    let mut txs = make_transactions(n);
    let aux = vec![0xAB; 8];
    txs[0].inputs[0].sign_script = aux.clone();
    txs[0].inputs[0].previous_output.hash = witness_commitment(&txs, &aux);
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256([0xAA; 32]),
            tx_root: Hash256([0xBB; 32]),
            timestamp: 1_700_000_000,
            difficulty: 0x1d00ffff,
            nonce: 42,
        },
        transactions: txs,
    }
}

fn bench_tree_from_hashes(c: &mut Criterion) {
    let hashes_10 = make_hashes(10);
    let hashes_1000 = make_hashes(1000);

    c.bench_function("merkle_tree_10_hashes", |b| {
        b.iter(|| build_merkle_tree_from_hashes(black_box(&hashes_10)))
    });

    c.bench_function("merkle_tree_1000_hashes", |b| {
        b.iter(|| build_merkle_tree_from_hashes(black_box(&hashes_1000)))
    });

    c.bench_function("merkle_tree_1000_hashes_blake3", |b| {
        b.iter(|| build_merkle_tree_from_hashes_with(&Blake3Hasher, black_box(&hashes_1000)))
    });
}

fn bench_witness_tree(c: &mut Criterion) {
    let txs = make_transactions(500);

    c.bench_function("witness_tree_500_txs", |b| {
        b.iter(|| build_merkle_tree(black_box(&txs), true))
    });
}

fn bench_validate_commitment(c: &mut Criterion) {
    let block = committed_block(500);

    c.bench_function("validate_witness_commitment_500_txs", |b| {
        b.iter(|| validate_witness_commitment(black_box(&block)))
    });
}

fn bench_block_hash(c: &mut Criterion) {
    let block = committed_block(1);

    c.bench_function("block_header_hash", |b| {
        b.iter(|| black_box(&block.header).hash())
    });
}

criterion_group!(
    benches,
    bench_tree_from_hashes,
    bench_witness_tree,
    bench_validate_commitment,
    bench_block_hash,
);
criterion_main!(benches);
