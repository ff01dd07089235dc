//! Error types for the storage adapters and the indexes built on them.
use thiserror::Error;

use tessera_core::error::BlockError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend: {0}")] Backend(String),
    #[error("namespace already exists: {0}")] NamespaceExists(String),
    #[error("namespace does not exist: {0}")] NamespaceMissing(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("corrupt index record {key}: {reason}")] Corruption { key: String, reason: String },
    #[error("index usage violation: {0}")] Usage(String),
    #[error("index operation interrupted")] Interrupted,
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Block(#[from] BlockError),
}

impl IndexError {
    /// Shorthand for a [`IndexError::Corruption`] naming `key`.
    pub fn corruption(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Corruption {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports internally inconsistent stored data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}
