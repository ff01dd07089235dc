//! Property and lifecycle test suite for the Tessera indexes.
//!
//! The integration tests under `tests/` drive the index manager through
//! random chains, reorganisations and interrupted drops. Shared block
//! builders and the delete-counting store wrapper live here.

pub mod counting;
pub mod helpers;
