//! Protocol and on-disk layout constants.

/// Size of a hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Serialized block header size: version(4) + prev_hash(32) + tx_root(32) +
/// timestamp(8) + difficulty(4) + nonce(8).
pub const BLOCK_HEADER_SIZE: usize = 4 + 2 * HASH_SIZE + 8 + 4 + 8;

/// Size of a serialized block locator.
pub const LOCATOR_SIZE: usize = 4;

/// Size of a serialized transaction location entry: locator + offset + length.
pub const TX_ENTRY_SIZE: usize = LOCATOR_SIZE + 4 + 4;

/// Forward-scan step used when recovering the highest assigned locator.
pub const DEFAULT_LOCATOR_SCAN_STEP: u32 = 100_000;

/// Maximum index entries deleted per transaction while dropping an index.
pub const DEFAULT_DROP_BATCH_SIZE: usize = 2_000;
