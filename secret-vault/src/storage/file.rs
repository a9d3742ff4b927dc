//! File-backed row store: one JSON document per context id.
//!
//! Writes go to a temp file that is renamed into place, so a reader never
//! observes a half-written document. Composite-key lookups scan the directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{doc_id, doc_str, matches_identity, RowStore};
use crate::error::{Result, SecretVaultError};

const DOCUMENT_EXTENSION: &str = "json";

#[derive(Debug)]
pub struct FileRowStore {
    dir: PathBuf,
    /// Serializes insert/update so the uniqueness check and write are atomic
    /// within this process.
    write_lock: Mutex<()>,
}

impl FileRowStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SecretVaultError::store("open", format!("{:?}: {}", dir, e)))?;
        debug!("Opened file row store at {:?}", dir);
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, id: &str, operation: &'static str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SecretVaultError::store(
                operation,
                format!("invalid document id '{}'", id),
            ));
        }
        Ok(self.dir.join(format!("{}.{}", id, DOCUMENT_EXTENSION)))
    }

    async fn read_document(path: &Path, operation: &'static str) -> Result<Option<Value>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SecretVaultError::store(operation, format!("{:?}: {}", path, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SecretVaultError::store(operation, format!("{:?}: {}", path, e))),
        }
    }

    async fn write_document(path: &Path, doc: &Value, operation: &'static str) -> Result<()> {
        let content = serde_json::to_vec_pretty(doc)?;
        let io_err =
            |e: std::io::Error| SecretVaultError::store(operation, format!("{:?}: {}", path, e));

        // Write atomically (write to temp file, then rename)
        let temp_path = path.with_extension("json.tmp");
        match tokio::fs::remove_file(&temp_path).await {
            Ok(()) => debug!("Removed stale temp file {:?}", temp_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }

        // Owner-only from creation on Unix
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp_path).await.map_err(io_err)?;
        file.write_all(&content).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&temp_path, path).await.map_err(io_err)?;
        Ok(())
    }

    async fn scan(&self, workspace_id: &str, user_id: &str) -> Result<Option<Value>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| SecretVaultError::store("find", e.to_string()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SecretVaultError::store("find", e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            match Self::read_document(&path, "find").await {
                Ok(Some(doc)) if matches_identity(&doc, workspace_id, user_id) => {
                    return Ok(Some(doc))
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable document {:?}: {}", path, e),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RowStore for FileRowStore {
    async fn find_by_composite_key(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<Option<Value>> {
        self.scan(workspace_id, user_id).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        let path = self.document_path(id, "find")?;
        Self::read_document(&path, "find").await
    }

    async fn insert(&self, doc: Value) -> Result<()> {
        let id = doc_id(&doc, "insert")?;
        let path = self.document_path(&id, "insert")?;

        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SecretVaultError::store("insert", format!("row {} already exists", id)));
        }
        let workspace_id = doc_str(&doc, "workspace_id").unwrap_or_default();
        let user_id = doc_str(&doc, "user_id").unwrap_or_default();
        if self.scan(workspace_id, user_id).await?.is_some() {
            return Err(SecretVaultError::store(
                "insert",
                format!("a row for {}/{} already exists", workspace_id, user_id),
            ));
        }

        Self::write_document(&path, &doc, "insert").await
    }

    async fn update(&self, id: &str, doc: Value) -> Result<()> {
        let path = self.document_path(id, "update")?;

        let _guard = self.write_lock.lock().await;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SecretVaultError::store("update", format!("row {} not found", id)));
        }
        Self::write_document(&path, &doc, "update").await
    }
}
