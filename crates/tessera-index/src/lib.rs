//! Block and transaction indexes for Tessera.
//!
//! - [`tx_index`]: transaction hash → block region, via compact block locators
//! - [`block_index`]: in-memory block topology and chain tips
//! - [`manager`]: sequences index updates inside the chain's transactions
//! - [`drop`]: resumable, batched index deletion
//!
//! Storage goes through the [`kv::KeyValueStore`] contract, with in-memory
//! ([`memory`]) and RocksDB ([`storage`]) adapters.

pub mod block_index;
pub mod config;
pub mod drop;
pub mod error;
pub mod interrupt;
pub mod kv;
pub mod manager;
pub mod memory;
pub mod storage;
pub mod tx_index;

pub use block_index::{BlockIndex, BlockNode, BlockStatus, TopologyIndexer};
pub use config::IndexConfig;
pub use error::{IndexError, StoreError};
pub use interrupt::{interrupt_channel, Interrupt, InterruptHandle};
pub use kv::{KeyValueStore, ReadTx, WriteTx};
pub use manager::{IndexManager, Indexer};
pub use memory::MemoryStore;
pub use storage::RocksStore;
pub use tx_index::TxIndex;
