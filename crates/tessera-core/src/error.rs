//! Error types for block layout and Merkle validation.
use thiserror::Error;

use crate::types::Hash256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("block too large to address: {size} bytes")] TooLarge { size: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("cannot validate witness commitment of block without transactions")] NoTransactions,
    #[error("coinbase transaction has no inputs")] CoinbaseNoInputs,
    #[error("coinbase input has no witness commitment")] MissingCommitment,
    #[error("witness commitment does not match: computed {computed}, coinbase includes {embedded}")]
    CommitmentMismatch { computed: Hash256, embedded: Hash256 },
}
