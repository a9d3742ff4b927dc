use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::{AuditLogEntry, AuditSink};
use crate::context::ContextKey;
use crate::error::{Result, SecretVaultError};

/// Keeps entries in memory; queryable for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<RwLock<Vec<AuditLogEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }

    pub async fn entries_for(&self, identity: &ContextKey) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.workspace_id == identity.workspace_id && e.user_id == identity.user_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}

/// Emits entries as structured tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        info!(
            target: "secret_vault::audit",
            workspace_id = %entry.workspace_id,
            user_id = %entry.user_id,
            operation = %entry.operation,
            context_kind = ?entry.context_kind,
            resource_key = %entry.resource_key,
            old_value_hash = ?entry.old_value_hash,
            new_value_hash = ?entry.new_value_hash,
            status = ?entry.status,
            error_message = ?entry.error_message,
            "audit"
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct FileAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry back. Used for forensics and tests.
    pub async fn read_all(&self) -> Result<Vec<AuditLogEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SecretVaultError::from))
            .collect()
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.path).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditOperation, AuditStatus};
    use crate::context::SecretKind;

    fn entry(user: &str) -> AuditLogEntry {
        AuditLogEntry::success(
            &ContextKey::new("w", user),
            AuditOperation::Create,
            Some(SecretKind::Credential),
            "openai_key",
        )
        .with_new_hash(Some("ab".repeat(32)))
    }

    #[tokio::test]
    async fn test_memory_sink_filters_by_identity() {
        let sink = MemoryAuditSink::new();
        sink.append(&entry("a")).await.unwrap();
        sink.append(&entry("b")).await.unwrap();

        assert_eq!(sink.len().await, 2);
        let for_a = sink.entries_for(&ContextKey::new("w", "a")).await;
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].status, AuditStatus::Success);
    }

    #[tokio::test]
    async fn test_file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path().join("audit.jsonl"));

        assert!(sink.read_all().await.unwrap().is_empty());
        sink.append(&entry("a")).await.unwrap();
        sink.append(&entry("b")).await.unwrap();

        let entries = sink.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].user_id, "b");
        assert_eq!(entries[0].new_value_hash.as_deref().map(str::len), Some(64));
    }

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        assert!(TracingAuditSink.append(&entry("a")).await.is_ok());
    }
}
