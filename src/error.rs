//! Error types for fetching and caching.

use std::time::Duration;

use thiserror::Error;

use crate::models::ItemId;

/// Errors raised while resolving an item through the cache or the network.
///
/// `Clone` so that one in-flight fetch can hand its outcome to every caller
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Nothing usable was cached under this key.
    #[error("cache miss for {0}")]
    CacheMiss(String),

    /// The item was removed upstream.
    #[error("item {0} was deleted")]
    Deleted(ItemId),

    /// The payload could not be decoded into the requested shape.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// The network request did not resolve in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Any other storage or transport failure.
    #[error("{0}")]
    Generic(String),
}

impl FetchError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::Generic(_))
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Generic(err.to_string())
        }
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => FetchError::CacheMiss(key),
            other => FetchError::Generic(other.to_string()),
        }
    }
}

/// Errors from the persistent cache tiers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for the key, or the record holds a different value kind.
    #[error("no cached record for {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to lock database connection")]
    Lock,

    /// The background disk writer is no longer running.
    #[error("disk writer has stopped")]
    WriterClosed,
}

/// Errors from building a comment tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InsertError {
    /// The named parent has not been inserted.
    #[error("parent comment {0} is not loaded")]
    MissingParent(ItemId),
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
