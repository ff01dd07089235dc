//! Hash primitives.
//!
//! Merkle branch hashing goes through the [`MerkleHasher`] trait so the
//! tree builders in [`crate::merkle`] stay independent of the primitive.
//! [`DoubleSha256`] is the protocol default.

use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Double SHA-256: `SHA256(SHA256(data))`.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash256(second.into())
}

/// Collision-resistant hash used to combine Merkle branches and to derive
/// witness commitments.
pub trait MerkleHasher: Send + Sync {
    /// Hash arbitrary bytes to 32 bytes.
    fn hash(&self, data: &[u8]) -> Hash256;
}

/// The protocol's designated hash: double SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleSha256;

impl MerkleHasher for DoubleSha256 {
    fn hash(&self, data: &[u8]) -> Hash256 {
        double_sha256(data)
    }
}

/// BLAKE3, for networks that commit with it instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hasher;

impl MerkleHasher for Blake3Hasher {
    fn hash(&self, data: &[u8]) -> Hash256 {
        Hash256(blake3::hash(data).into())
    }
}
