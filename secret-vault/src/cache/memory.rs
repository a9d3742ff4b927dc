use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::ContextCache;
use crate::context::{ContextKey, SecretContext};

const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
struct CacheValue {
    context: SecretContext,
    expires_at: Instant,
}

/// Bounded in-memory LRU with a TTL per entry.
pub struct MemoryContextCache {
    inner: Mutex<LruCache<ContextKey, CacheValue>>,
}

impl MemoryContextCache {
    pub fn new(capacity: usize) -> Self {
        let size = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(size)),
        }
    }

    /// Start a background task that drops expired entries every `interval`.
    /// It only removes keys and stops once the cache is dropped.
    pub fn spawn_eviction(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    debug!("Context cache dropped, stopping eviction task");
                    break;
                };
                let removed = cache.purge_expired(Instant::now());
                if removed > 0 {
                    debug!("Evicted {} expired context cache entries", removed);
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<ContextKey, CacheValue>>> {
        match self.inner.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("Context cache lock poisoned, treating as unavailable");
                None
            }
        }
    }

    pub(crate) fn purge_expired(&self, now: Instant) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let expired: Vec<ContextKey> = inner
            .iter()
            .filter(|(_, value)| value.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.pop(key);
        }
        expired.len()
    }

    fn get_with_now(&self, key: &ContextKey, now: Instant) -> Option<SecretContext> {
        let mut inner = self.lock()?;
        let expired = match inner.get(key) {
            Some(value) if value.expires_at > now => return Some(value.context.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.pop(key);
        }
        None
    }

    fn set_with_now(&self, key: &ContextKey, context: SecretContext, ttl: Duration, now: Instant) {
        if let Some(mut inner) = self.lock() {
            inner.put(
                key.clone(),
                CacheValue {
                    context,
                    expires_at: now + ttl,
                },
            );
        }
    }
}

impl Default for MemoryContextCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[async_trait]
impl ContextCache for MemoryContextCache {
    async fn get(&self, key: &ContextKey) -> Option<SecretContext> {
        self.get_with_now(key, Instant::now())
    }

    async fn set(&self, key: &ContextKey, context: SecretContext, ttl: Duration) {
        self.set_with_now(key, context, ttl, Instant::now());
    }

    async fn delete(&self, key: &ContextKey) {
        if let Some(mut inner) = self.lock() {
            inner.pop(key);
        }
    }
}
