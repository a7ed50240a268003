//! Cache invalidation seam.
//!
//! The core has no opinion on what cache sits in front of its readers. Store
//! writes call through a `CacheInvalidator` after a successful commit; the
//! default is a no-op so the core runs standalone.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache invalidation failed: {0}")]
    Failed(String),
}

/// Invoked after a transactional write with a glob-style key pattern
/// (e.g. `market:{condition_id}:*`) describing what became stale.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate_pattern(&self, pattern: &str) -> Result<(), CacheError>;
}

/// Default invalidator: does nothing. Used when no cache sits in front of the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    async fn invalidate_pattern(&self, _pattern: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_invalidator_always_succeeds() {
        let invalidator = NoopInvalidator;
        assert!(invalidator.invalidate_pattern("market:*").await.is_ok());
    }
}
