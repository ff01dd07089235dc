//! Core protocol types: transactions, blocks, spendable-output views.
//!
//! Every hashed or stored layout in this module is a fixed, explicit byte
//! layout (little-endian integers, length-prefixed scripts) so that block
//! offsets recorded by the indexes stay stable across releases.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::BLOCK_HEADER_SIZE;
use crate::error::BlockError;
use crate::hash::double_sha256;

/// A 32-byte hash value.
///
/// Used for transaction hashes, block hashes, and Merkle nodes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    ///
    /// Marks "no parent" in block headers and is the placeholder leaf of
    /// witness Merkle trees.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash256 from a slice. Returns `None` unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
///
/// In a coinbase input the hash carries the block's witness commitment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Hash of the transaction containing the referenced output.
    pub hash: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}

/// A transaction input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// The outpoint being spent.
    pub previous_output: OutPoint,
    /// Relative lock sequence.
    pub sequence: u32,
    /// Unlocking script. Witness data: excluded from [`Transaction::txid`].
    pub sign_script: Vec<u8>,
}

/// A transaction output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in atomic units.
    pub amount: u64,
    /// Locking script.
    pub pk_script: Vec<u8>,
}

/// A transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Protocol version.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block order or timestamp before which this tx is invalid.
    pub lock_time: u32,
}

impl Transaction {
    /// Transaction hash excluding witness data (double SHA-256 of the
    /// encoding without signature scripts).
    pub fn txid(&self) -> Hash256 {
        double_sha256(&self.encode(false))
    }

    /// Witness-inclusive transaction hash (double SHA-256 of the full encoding).
    pub fn full_hash(&self) -> Hash256 {
        double_sha256(&self.encode(true))
    }

    /// Full wire encoding, as stored inside a serialized block.
    pub fn serialize(&self) -> Vec<u8> {
        self.encode(true)
    }

    /// Length of [`serialize`](Self::serialize) without allocating.
    pub fn serialized_size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|input| 32 + 4 + 4 + 4 + input.sign_script.len())
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|output| 8 + 4 + output.pk_script.len())
            .sum();
        4 + 4 + inputs + 4 + outputs + 4
    }

    /// Check if this looks like a coinbase: the first transaction of a block
    /// with exactly one input spending index `u32::MAX`.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.index == u32::MAX
    }

    fn encode(&self, with_witness: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(input.previous_output.hash.as_bytes());
            buf.extend_from_slice(&input.previous_output.index.to_le_bytes());
            buf.extend_from_slice(&input.sequence.to_le_bytes());
            if with_witness {
                buf.extend_from_slice(&(input.sign_script.len() as u32).to_le_bytes());
                buf.extend_from_slice(&input.sign_script);
            }
        }
        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&output.amount.to_le_bytes());
            buf.extend_from_slice(&(output.pk_script.len() as u32).to_le_bytes());
            buf.extend_from_slice(&output.pk_script);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }
}

/// Block header.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u32,
    /// Hash of the parent block. Zero for genesis.
    pub prev_hash: Hash256,
    /// Merkle root over the block's transaction hashes.
    pub tx_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Compact difficulty target.
    pub difficulty: u32,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Fixed header layout: version || prev_hash || tx_root || timestamp ||
    /// difficulty || nonce, integers little-endian.
    pub fn serialize(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut out = [0u8; BLOCK_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.tx_root.as_bytes());
        out[68..76].copy_from_slice(&self.timestamp.to_le_bytes());
        out[76..80].copy_from_slice(&self.difficulty.to_le_bytes());
        out[80..88].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Block hash: double SHA-256 of the fixed header layout.
    pub fn hash(&self) -> Hash256 {
        double_sha256(&self.serialize())
    }
}

/// Location of one transaction within a serialized block.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxLoc {
    /// Byte offset from the start of the serialized block.
    pub offset: u32,
    /// Serialized length in bytes.
    pub len: u32,
}

/// A complete block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// Transactions; the first is the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block hash.
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// The coinbase transaction, if the block has any transactions.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Canonical block encoding: header || tx_count (u32 LE) || transactions.
    pub fn serialize(&self) -> Vec<u8> {
        let body: usize = self.transactions.iter().map(Transaction::serialized_size).sum();
        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE + 4 + body);
        buf.extend_from_slice(&self.header.serialize());
        buf.extend_from_slice(&(self.transactions.len() as u32).to_le_bytes());
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.serialize());
        }
        buf
    }

    /// Offset and length of every transaction within [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// [`BlockError::TooLarge`] if any location does not fit a `u32`.
    pub fn tx_locations(&self) -> Result<Vec<TxLoc>, BlockError> {
        let mut offset = (BLOCK_HEADER_SIZE + 4) as u64;
        let mut locs = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            let len = tx.serialized_size() as u64;
            let end = offset + len;
            if end > u32::MAX as u64 {
                return Err(BlockError::TooLarge { size: end });
            }
            locs.push(TxLoc {
                offset: offset as u32,
                len: len as u32,
            });
            offset = end;
        }
        Ok(locs)
    }
}

/// A region of a stored block: the block hash plus a byte range within its
/// serialized form.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRegion {
    /// Hash of the containing block.
    pub hash: Hash256,
    /// Byte offset within the serialized block.
    pub offset: u32,
    /// Length in bytes.
    pub len: u32,
}

impl BlockRegion {
    /// Slice this region out of the raw serialized block.
    ///
    /// Returns `None` if the region runs past the end of `raw_block`.
    pub fn slice<'a>(&self, raw_block: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.offset as usize;
        let end = start.checked_add(self.len as usize)?;
        raw_block.get(start..end)
    }
}

/// A spendable output as seen by the chain engine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    /// The output itself.
    pub output: TxOutput,
    /// Order of the block that created it.
    pub block_order: u32,
    /// Whether it was created by a coinbase.
    pub is_coinbase: bool,
}

/// View of spendable outputs handed to indexes alongside each block.
///
/// Owned by the chain engine; the indexes only read it.
#[derive(Clone, Debug, Default)]
pub struct UtxoViewpoint {
    entries: HashMap<OutPoint, UtxoEntry>,
}

impl UtxoViewpoint {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spendable output.
    pub fn add_entry(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.entries.insert(outpoint, entry);
    }

    /// Look up an output.
    pub fn lookup(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Number of outputs in the view.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the view holds no outputs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
