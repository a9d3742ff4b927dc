use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{doc_id, doc_str, matches_identity, RowStore};
use crate::error::{Result, SecretVaultError};

/// In-process row store. Enforces id and (workspace, user) uniqueness.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowStore {
    rows: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn find_by_composite_key(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<Option<Value>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|doc| matches_identity(doc, workspace_id, user_id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn insert(&self, doc: Value) -> Result<()> {
        let id = doc_id(&doc, "insert")?;
        let workspace_id = doc_str(&doc, "workspace_id").unwrap_or_default();
        let user_id = doc_str(&doc, "user_id").unwrap_or_default();

        let mut rows = self.rows.write().await;
        if rows.contains_key(&id) {
            return Err(SecretVaultError::store("insert", format!("row {} already exists", id)));
        }
        if rows
            .values()
            .any(|existing| matches_identity(existing, workspace_id, user_id))
        {
            return Err(SecretVaultError::store(
                "insert",
                format!("a row for {}/{} already exists", workspace_id, user_id),
            ));
        }
        rows.insert(id, doc);
        Ok(())
    }

    async fn update(&self, id: &str, doc: Value) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(id) {
            Some(slot) => {
                *slot = doc;
                Ok(())
            }
            None => Err(SecretVaultError::store("update", format!("row {} not found", id))),
        }
    }
}
