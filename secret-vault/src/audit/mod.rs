//! Append-only audit trail of secret access and mutation.
//!
//! Entries record who touched which named secret and how, with SHA-256 hashes
//! standing in for values. Plaintext and ciphertext never reach a sink.
//! Appending is best-effort: sink failures are logged and swallowed.

mod sinks;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::{ContextKey, SecretKind};
use crate::error::Result;

pub use sinks::{FileAuditSink, MemoryAuditSink, TracingAuditSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Create,
    Read,
    Update,
    Delete,
    List,
    Rotate,
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Rotate => "rotate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failed,
}

/// Immutable record of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub workspace_id: String,
    pub user_id: String,
    pub operation: AuditOperation,
    /// `None` for operations spanning every kind, such as listing.
    pub context_kind: Option<SecretKind>,
    pub resource_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value_hash: Option<String>,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn success(
        identity: &ContextKey,
        operation: AuditOperation,
        context_kind: Option<SecretKind>,
        resource_key: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: identity.workspace_id.clone(),
            user_id: identity.user_id.clone(),
            operation,
            context_kind,
            resource_key: resource_key.into(),
            old_value_hash: None,
            new_value_hash: None,
            status: AuditStatus::Success,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        identity: &ContextKey,
        operation: AuditOperation,
        context_kind: Option<SecretKind>,
        resource_key: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            status: AuditStatus::Failed,
            error_message: Some(error_message.into()),
            ..Self::success(identity, operation, context_kind, resource_key)
        }
    }

    pub fn with_old_hash(mut self, hash: Option<String>) -> Self {
        self.old_value_hash = hash;
        self
    }

    pub fn with_new_hash(mut self, hash: Option<String>) -> Self {
        self.new_value_hash = hash;
        self
    }
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;
}

/// Best-effort front for a sink. Never propagates sink failures.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, entry: AuditLogEntry) {
        if let Err(e) = self.sink.append(&entry).await {
            warn!(
                "Failed to append audit entry ({} {} {}/{}): {}",
                entry.operation, entry.resource_key, entry.workspace_id, entry.user_id, e
            );
        }
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}
