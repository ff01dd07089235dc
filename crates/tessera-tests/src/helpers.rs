//! Shared block builders.

use tessera_core::merkle::calc_merkle_root;
use tessera_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Create a coinbase transaction unique to `height`.
pub fn make_coinbase(height: u32) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint {
                hash: Hash256::ZERO,
                index: u32::MAX,
            },
            sequence: u32::MAX,
            sign_script: height.to_le_bytes().to_vec(),
        }],
        outputs: vec![TxOutput {
            amount: 50,
            pk_script: vec![0x51],
        }],
        lock_time: height,
    }
}

/// Create a spending transaction whose txid is determined by `seed`.
pub fn make_tx(seed: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint {
                hash: Hash256([(seed % 251) as u8; 32]),
                index: seed as u32,
            },
            sequence: 0,
            sign_script: seed.to_le_bytes().to_vec(),
        }],
        outputs: vec![TxOutput {
            amount: seed,
            pk_script: vec![0x76, 0xa9],
        }],
        lock_time: 0,
    }
}

/// Create a block on `prev_hash` with a coinbase and `extra_txs` spends.
///
/// `nonce` distinguishes sibling blocks at the same height.
pub fn make_block(prev_hash: Hash256, height: u32, extra_txs: u32, nonce: u64) -> Block {
    let mut txs = vec![make_coinbase(height)];
    let base = (u64::from(height) << 32) | ((nonce & 0xffff) << 16);
    txs.extend((0..extra_txs).map(|i| make_tx(base + u64::from(i))));
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            tx_root: calc_merkle_root(&txs),
            timestamp: 1_700_000_000 + u64::from(height),
            difficulty: 0x1d00ffff,
            nonce,
        },
        transactions: txs,
    }
}

/// Build `length` linked blocks starting on `prev_hash` at `start_height`.
pub fn make_chain(prev_hash: Hash256, start_height: u32, length: u32, extra_txs: u32) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(length as usize);
    let mut prev = prev_hash;
    for height in start_height..start_height + length {
        let block = make_block(prev, height, extra_txs, 0);
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_linked() {
        let chain = make_chain(Hash256::ZERO, 0, 5, 2);
        assert_eq!(chain[0].header.prev_hash, Hash256::ZERO);
        for pair in chain.windows(2) {
            assert_eq!(pair[1].header.prev_hash, pair[0].hash());
        }
    }

    #[test]
    fn siblings_differ() {
        let a = make_block(Hash256::ZERO, 1, 2, 0);
        let b = make_block(Hash256::ZERO, 1, 2, 1);
        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.transactions[1].txid(), b.transactions[1].txid());
    }
}
