//! Errors surfaced by the cache
//!
//! Callers either passed a bad key or their producer failed. Producer error
//! kinds stay opaque and are carried as the `source` of `ProducerFailure`.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed producer failure that can be cloned into several snapshots
pub type ProducerError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur when resolving a cached value
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The key was empty or whitespace only
    #[error("Cache key must not be empty")]
    InvalidKey,

    /// The caller-supplied producer failed
    #[error("Producer failed: {0}")]
    ProducerFailure(#[source] ProducerError),
}

impl CacheError {
    /// Wraps any producer error into a `ProducerFailure`
    pub fn producer<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        CacheError::ProducerFailure(Arc::from(err.into()))
    }

    /// Returns true if this error came from the producer
    pub fn is_producer_failure(&self) -> bool {
        matches!(self, CacheError::ProducerFailure(_))
    }
}

/// Validates a cache key
pub(crate) fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidKey);
    }
    Ok(())
}
