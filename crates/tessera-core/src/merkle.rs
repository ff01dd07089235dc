//! Merkle trees stored as a flat array.
//!
//! A tree over `n > 0` leaves occupies `2P - 1` slots, where `P` is the
//! smallest power of two `>= n`:
//!
//! ```text
//! [ h0 h1 h2 h3 | h01 h23 | root ]      n = 4, P = 4
//! [ h0 h1 h2 -- | h01 h22 | root ]      n = 3, P = 4
//! ```
//!
//! Leaves come first, each level follows the previous one, and the root is
//! always the last slot. Padding slots are `None`. A parent with no left
//! child is `None`; a parent with only a left child hashes the left child
//! with itself. The empty tree is a single zero hash.
//!
//! Witness trees replace leaf 0 (the coinbase) with [`Hash256::ZERO`] and use
//! witness-inclusive transaction hashes for every other leaf.

use crate::error::MerkleError;
use crate::hash::{DoubleSha256, MerkleHasher};
use crate::types::{Block, Hash256, Transaction};

/// Flat Merkle tree: leaves, then each level, root last.
pub type MerkleTreeStore = Vec<Option<Hash256>>;

/// Smallest power of two `>= n`. Returns `n` unchanged if it already is one.
pub fn next_power_of_two(n: usize) -> usize {
    n.next_power_of_two()
}

/// Hash the 64-byte concatenation `left || right` with the default hasher.
pub fn hash_merkle_branches(left: &Hash256, right: &Hash256) -> Hash256 {
    hash_merkle_branches_with(&DoubleSha256, left, right)
}

/// Hash the 64-byte concatenation `left || right` with `hasher`.
pub fn hash_merkle_branches_with(
    hasher: &dyn MerkleHasher,
    left: &Hash256,
    right: &Hash256,
) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    hasher.hash(&buf)
}

/// Build the transaction Merkle tree of a block with the default hasher.
pub fn build_merkle_tree(transactions: &[Transaction], witness: bool) -> MerkleTreeStore {
    build_merkle_tree_with(&DoubleSha256, transactions, witness)
}

/// Build the transaction Merkle tree of a block with `hasher`.
///
/// In witness mode, slot 0 is the zero placeholder and the remaining leaves
/// are [`Transaction::full_hash`]; otherwise every leaf is
/// [`Transaction::txid`].
pub fn build_merkle_tree_with(
    hasher: &dyn MerkleHasher,
    transactions: &[Transaction],
    witness: bool,
) -> MerkleTreeStore {
    let leaves: Vec<Hash256> = transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| match (witness, i) {
            (true, 0) => Hash256::ZERO,
            (true, _) => tx.full_hash(),
            (false, _) => tx.txid(),
        })
        .collect();
    build_merkle_tree_from_hashes_with(hasher, &leaves)
}

/// Build a Merkle tree over precomputed leaf hashes (block parents, balance
/// commitments) with the default hasher.
pub fn build_merkle_tree_from_hashes(leaves: &[Hash256]) -> MerkleTreeStore {
    build_merkle_tree_from_hashes_with(&DoubleSha256, leaves)
}

/// Build a Merkle tree over precomputed leaf hashes with `hasher`.
pub fn build_merkle_tree_from_hashes_with(
    hasher: &dyn MerkleHasher,
    leaves: &[Hash256],
) -> MerkleTreeStore {
    if leaves.is_empty() {
        return vec![Some(Hash256::ZERO)];
    }

    let width = next_power_of_two(leaves.len());
    let size = width * 2 - 1;
    let mut tree: MerkleTreeStore = vec![None; size];
    for (slot, leaf) in tree.iter_mut().zip(leaves) {
        *slot = Some(*leaf);
    }

    let mut offset = width;
    for i in (0..size - 1).step_by(2) {
        tree[offset] = match (tree[i], tree[i + 1]) {
            (None, _) => None,
            (Some(left), None) => Some(hash_merkle_branches_with(hasher, &left, &left)),
            (Some(left), Some(right)) => Some(hash_merkle_branches_with(hasher, &left, &right)),
        };
        offset += 1;
    }

    tree
}

/// The root of a flat tree (its last slot). Zero for an empty store.
pub fn tree_root(tree: &[Option<Hash256>]) -> Hash256 {
    tree.last().copied().flatten().unwrap_or(Hash256::ZERO)
}

/// Merkle root over the transaction hashes of `transactions`.
pub fn calc_merkle_root(transactions: &[Transaction]) -> Hash256 {
    tree_root(&build_merkle_tree(transactions, false))
}

/// Witness commitment for `transactions` given the coinbase's auxiliary
/// commitment data: `H(witness_root || aux)`.
pub fn witness_commitment(transactions: &[Transaction], aux: &[u8]) -> Hash256 {
    witness_commitment_with(&DoubleSha256, transactions, aux)
}

/// [`witness_commitment`] with an explicit hasher.
pub fn witness_commitment_with(
    hasher: &dyn MerkleHasher,
    transactions: &[Transaction],
    aux: &[u8],
) -> Hash256 {
    let root = tree_root(&build_merkle_tree_with(hasher, transactions, true));
    let mut preimage = Vec::with_capacity(32 + aux.len());
    preimage.extend_from_slice(root.as_bytes());
    preimage.extend_from_slice(aux);
    hasher.hash(&preimage)
}

/// Check the witness commitment carried by a block's coinbase.
///
/// The commitment is the previous-outpoint hash of the coinbase's first
/// input; the auxiliary data is that input's signature script.
///
/// # Errors
///
/// - [`MerkleError::NoTransactions`] if the block is empty
/// - [`MerkleError::CoinbaseNoInputs`] if the coinbase has no inputs
/// - [`MerkleError::MissingCommitment`] if the embedded commitment is zero
/// - [`MerkleError::CommitmentMismatch`] with both hashes otherwise
pub fn validate_witness_commitment(block: &Block) -> Result<(), MerkleError> {
    validate_witness_commitment_with(&DoubleSha256, block)
}

/// [`validate_witness_commitment`] with an explicit hasher.
pub fn validate_witness_commitment_with(
    hasher: &dyn MerkleHasher,
    block: &Block,
) -> Result<(), MerkleError> {
    let coinbase = block.coinbase().ok_or(MerkleError::NoTransactions)?;
    let input = coinbase.inputs.first().ok_or(MerkleError::CoinbaseNoInputs)?;

    let embedded = input.previous_output.hash;
    if embedded.is_zero() {
        return Err(MerkleError::MissingCommitment);
    }

    let computed = witness_commitment_with(hasher, &block.transactions, &input.sign_script);
    if computed != embedded {
        return Err(MerkleError::CommitmentMismatch { computed, embedded });
    }
    Ok(())
}
