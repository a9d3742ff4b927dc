//! Durable row storage for secret context documents.
//!
//! The row store sees documents as opaque JSON. It only relies on the
//! top-level `id`, `workspace_id` and `user_id` fields for lookups.

mod file;
mod memory;
mod records;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SecretVaultError};
use crate::security::ENCRYPTED_FIELDS_KEY;

pub use file::FileRowStore;
pub use memory::MemoryRowStore;
pub use records::SecretRecordStore;

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn find_by_composite_key(&self, workspace_id: &str, user_id: &str)
        -> Result<Option<Value>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>>;

    async fn insert(&self, doc: Value) -> Result<()>;

    async fn update(&self, id: &str, doc: Value) -> Result<()>;
}

/// Top-level fields row stores look documents up by. They stay in clear.
pub const IDENTITY_FIELDS: [&str; 3] = ["id", "workspace_id", "user_id"];

/// Whether a top-level document field may be sealed at rest.
pub fn is_sealable_field(name: &str) -> bool {
    !IDENTITY_FIELDS.contains(&name) && name != ENCRYPTED_FIELDS_KEY
}

pub(crate) fn doc_str<'a>(doc: &'a Value, field: &str) -> Option<&'a str> {
    doc.get(field).and_then(Value::as_str)
}

pub(crate) fn doc_id(doc: &Value, operation: &'static str) -> Result<String> {
    doc_str(doc, "id")
        .map(str::to_string)
        .ok_or_else(|| SecretVaultError::store(operation, "document has no string 'id' field"))
}

pub(crate) fn matches_identity(doc: &Value, workspace_id: &str, user_id: &str) -> bool {
    doc_str(doc, "workspace_id") == Some(workspace_id) && doc_str(doc, "user_id") == Some(user_id)
}
