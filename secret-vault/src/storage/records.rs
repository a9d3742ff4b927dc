//! SecretRecordStore - persists one document per identity behind a
//! read-through cache.
//!
//! Reads probe the cache first and fill it on a miss. Writes upsert the row
//! and then invalidate the cache entry instead of updating it, so the next
//! read repopulates from the value that was just persisted.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::{is_sealable_field, RowStore};
use crate::cache::ContextCache;
use crate::context::{ContextKey, SecretContext};
use crate::error::{Result, SecretVaultError};
use crate::security::{decrypt_fields, encrypt_fields, Keyring, ENCRYPTED_FIELDS_KEY};

/// Document-level field encryption layered over the per-entry envelopes.
struct FieldSealing {
    keyring: Arc<Keyring>,
    fields: Vec<String>,
}

pub struct SecretRecordStore {
    rows: Arc<dyn RowStore>,
    cache: Arc<dyn ContextCache>,
    ttl: Duration,
    sealing: Option<FieldSealing>,
}

impl SecretRecordStore {
    pub fn new(rows: Arc<dyn RowStore>, cache: Arc<dyn ContextCache>, ttl: Duration) -> Self {
        Self {
            rows,
            cache,
            ttl,
            sealing: None,
        }
    }

    /// Encrypt the named top-level document fields on write and decrypt them
    /// on read. Identity and bookkeeping fields are never sealed. An empty
    /// field list disables sealing.
    pub fn with_sealed_fields(mut self, keyring: Arc<Keyring>, fields: Vec<String>) -> Self {
        let fields: Vec<String> = fields
            .into_iter()
            .filter(|name| {
                let sealable = is_sealable_field(name);
                if !sealable {
                    warn!("Ignoring sealed field '{}': needed in clear for lookups", name);
                }
                sealable
            })
            .collect();
        self.sealing = if fields.is_empty() {
            None
        } else {
            Some(FieldSealing { keyring, fields })
        };
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Load the context for an identity, cache first.
    pub async fn read(&self, key: &ContextKey) -> Result<Option<SecretContext>> {
        if let Some(context) = self.cache.get(key).await {
            debug!("Context cache hit for {}", key);
            return Ok(Some(context));
        }
        debug!("Context cache miss for {}", key);

        let Some(doc) = self
            .rows
            .find_by_composite_key(&key.workspace_id, &key.user_id)
            .await?
        else {
            return Ok(None);
        };

        let context = self.decode(doc, key)?;
        self.cache.set(key, context.clone(), self.ttl).await;
        Ok(Some(context))
    }

    /// Insert the context if no row has its id yet, otherwise update it.
    /// Then drop the cached copy.
    pub async fn write(&self, context: &SecretContext) -> Result<()> {
        let doc = self.encode(context)?;
        let id = context.id.to_string();

        if self.rows.find_by_id(&id).await?.is_some() {
            self.rows.update(&id, doc).await?;
            debug!("Updated context row {}", id);
        } else {
            self.rows.insert(doc).await?;
            debug!("Inserted context row {}", id);
        }

        self.invalidate(&context.key()).await;
        Ok(())
    }

    pub async fn invalidate(&self, key: &ContextKey) {
        self.cache.delete(key).await;
    }

    fn encode(&self, context: &SecretContext) -> Result<Value> {
        let doc = context.to_document()?;
        match &self.sealing {
            Some(sealing) => {
                let fields: Vec<&str> = sealing.fields.iter().map(String::as_str).collect();
                Ok(encrypt_fields(sealing.keyring.as_ref(), &doc, &fields, None)?)
            }
            None => Ok(doc),
        }
    }

    fn decode(&self, doc: Value, key: &ContextKey) -> Result<SecretContext> {
        let doc = match (&self.sealing, doc.get(ENCRYPTED_FIELDS_KEY)) {
            (Some(sealing), _) => decrypt_fields(sealing.keyring.as_ref(), &doc)?,
            (None, Some(_)) => {
                warn!("Context {} has sealed fields but sealing is not configured", key);
                doc
            }
            (None, None) => doc,
        };

        SecretContext::from_document(doc).map_err(|e| {
            SecretVaultError::store("read", format!("context {} could not be decoded: {}", key, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryContextCache, NoopContextCache};
    use crate::context::EncryptedCredential;
    use crate::security::{EncryptedEnvelope, EncryptionEngine, EngineKey};
    use crate::storage::MemoryRowStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRowStore {
        inner: MemoryRowStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl RowStore for CountingRowStore {
        async fn find_by_composite_key(
            &self,
            workspace_id: &str,
            user_id: &str,
        ) -> Result<Option<Value>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_composite_key(workspace_id, user_id).await
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
            self.inner.find_by_id(id).await
        }

        async fn insert(&self, doc: Value) -> Result<()> {
            self.inner.insert(doc).await
        }

        async fn update(&self, id: &str, doc: Value) -> Result<()> {
            self.inner.update(id, doc).await
        }
    }

    fn keyring() -> Arc<Keyring> {
        Arc::new(Keyring::new(EncryptionEngine::from_key(
            EngineKey::from_slice(&[3u8; 32]).unwrap(),
            1,
        )))
    }

    fn with_credential(mut context: SecretContext, envelope: EncryptedEnvelope) -> SecretContext {
        let now = Utc::now();
        context.credentials.insert(
            "token".into(),
            EncryptedCredential {
                envelope,
                credential_type: "api_key".into(),
                provider: "aws".into(),
                created_at: now,
                updated_at: now,
            },
        );
        context
    }

    #[tokio::test]
    async fn test_read_through_fills_cache() {
        let rows = Arc::new(CountingRowStore::default());
        let store = SecretRecordStore::new(
            rows.clone(),
            Arc::new(MemoryContextCache::default()),
            Duration::from_secs(300),
        );
        let key = ContextKey::new("w", "u");
        store.write(&SecretContext::new(&key)).await.unwrap();

        assert!(store.read(&key).await.unwrap().is_some());
        assert!(store.read(&key).await.unwrap().is_some());
        assert_eq!(rows.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_invalidates_cache() {
        let rows = Arc::new(CountingRowStore::default());
        let store = SecretRecordStore::new(
            rows.clone(),
            Arc::new(MemoryContextCache::default()),
            Duration::from_secs(300),
        );
        let key = ContextKey::new("w", "u");
        let context = SecretContext::new(&key);
        store.write(&context).await.unwrap();
        store.read(&key).await.unwrap();

        let envelope = keyring().encrypt("v", None).unwrap();
        let updated = with_credential(context, envelope);
        store.write(&updated).await.unwrap();

        let reread = store.read(&key).await.unwrap().unwrap();
        assert_eq!(reread, updated);
        assert_eq!(rows.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_absent_context_is_none() {
        let store = SecretRecordStore::new(
            Arc::new(MemoryRowStore::new()),
            Arc::new(NoopContextCache),
            Duration::from_secs(300),
        );
        assert!(store.read(&ContextKey::new("w", "u")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sealed_fields_are_encrypted_at_rest() {
        let rows = Arc::new(MemoryRowStore::new());
        let keyring = keyring();
        let store = SecretRecordStore::new(
            rows.clone(),
            Arc::new(NoopContextCache),
            Duration::from_secs(300),
        )
        .with_sealed_fields(keyring.clone(), vec!["credentials".into()]);

        let key = ContextKey::new("w", "u");
        let context = with_credential(
            SecretContext::new(&key),
            keyring.encrypt("v", None).unwrap(),
        );
        store.write(&context).await.unwrap();

        let raw = rows.find_by_composite_key("w", "u").await.unwrap().unwrap();
        assert!(EncryptedEnvelope::looks_like(&raw["credentials"]));
        assert!(raw.get(ENCRYPTED_FIELDS_KEY).is_some());

        assert_eq!(store.read(&key).await.unwrap().unwrap(), context);
    }

    #[tokio::test]
    async fn test_identity_fields_never_sealed() {
        let rows = Arc::new(MemoryRowStore::new());
        let keyring = keyring();
        let store = SecretRecordStore::new(
            rows.clone(),
            Arc::new(NoopContextCache),
            Duration::from_secs(300),
        )
        .with_sealed_fields(
            keyring.clone(),
            vec![
                "workspace_id".into(),
                "user_id".into(),
                "id".into(),
                ENCRYPTED_FIELDS_KEY.into(),
            ],
        );

        let key = ContextKey::new("w", "u");
        let mut context = with_credential(
            SecretContext::new(&key),
            keyring.encrypt("v", None).unwrap(),
        );
        store.write(&context).await.unwrap();

        let raw = rows.find_by_composite_key("w", "u").await.unwrap().unwrap();
        assert_eq!(raw["workspace_id"], "w");
        assert!(raw.get(ENCRYPTED_FIELDS_KEY).is_none());

        // A second write updates the same row instead of inserting another
        context.touch();
        store.write(&context).await.unwrap();
        assert_eq!(rows.len().await, 1);
        assert_eq!(store.read(&key).await.unwrap().unwrap(), context);
    }
}
