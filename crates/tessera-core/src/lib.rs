//! # tessera-core
//! Block types, hash primitives, and Merkle tree construction shared by the
//! Tessera indexes and block validation.

pub mod constants;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod types;
