//! Read-through cache in front of the record store.
//!
//! Every operation is fire-and-forget: an unavailable cache behaves like a
//! permanent miss and never surfaces an error to callers.

mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::context::{ContextKey, SecretContext};

pub use memory::MemoryContextCache;

#[async_trait]
pub trait ContextCache: Send + Sync {
    async fn get(&self, key: &ContextKey) -> Option<SecretContext>;

    async fn set(&self, key: &ContextKey, context: SecretContext, ttl: Duration);

    async fn delete(&self, key: &ContextKey);
}

/// Cache that never holds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopContextCache;

#[async_trait]
impl ContextCache for NoopContextCache {
    async fn get(&self, _key: &ContextKey) -> Option<SecretContext> {
        None
    }

    async fn set(&self, _key: &ContextKey, _context: SecretContext, _ttl: Duration) {}

    async fn delete(&self, _key: &ContextKey) {}
}
