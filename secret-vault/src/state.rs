use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::audit::{AuditLog, AuditSink, FileAuditSink, TracingAuditSink};
use crate::cache::{ContextCache, MemoryContextCache};
use crate::config::VaultConfig;
use crate::error::{Result, SecretVaultError};
use crate::security::{EncryptionEngine, Keyring};
use crate::service::SecretContextService;
use crate::storage::{FileRowStore, MemoryRowStore, RowStore, SecretRecordStore};

const CONTEXTS_DIR: &str = "contexts";
const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// Process-wide wiring. Built once at startup from configuration; the key
/// ring is handed explicitly to the components that need it.
pub struct VaultState {
    pub keyring: Arc<Keyring>,
    pub records: Arc<SecretRecordStore>,
    pub service: Arc<SecretContextService>,
    eviction_task: JoinHandle<()>,
}

impl VaultState {
    pub async fn from_config(config: &VaultConfig) -> Result<Self> {
        config.validate()?;

        // Argon2 derivation blocks; run it off the async workers
        let keyring_config = config.clone();
        let keyring = tokio::task::spawn_blocking(move || build_keyring(&keyring_config))
            .await
            .map_err(|e| SecretVaultError::Config(format!("key derivation task failed: {}", e)))??;
        let keyring = Arc::new(keyring);

        let rows: Arc<dyn RowStore>;
        let sink: Arc<dyn AuditSink>;
        match &config.data_dir {
            Some(dir) => {
                rows = Arc::new(FileRowStore::open(dir.join(CONTEXTS_DIR)).await?);
                sink = Arc::new(FileAuditSink::new(dir.join(AUDIT_FILE_NAME)));
                info!("Using file storage at {:?}", dir);
            }
            None => {
                rows = Arc::new(MemoryRowStore::new());
                sink = Arc::new(TracingAuditSink);
                info!("Using in-memory storage");
            }
        }

        Ok(Self::assemble(config, keyring, rows, sink))
    }

    /// Wire components around an existing key ring, row store and audit sink.
    pub fn assemble(
        config: &VaultConfig,
        keyring: Arc<Keyring>,
        rows: Arc<dyn RowStore>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        let cache = Arc::new(MemoryContextCache::new(config.cache_capacity));
        let eviction_task =
            cache.spawn_eviction(Duration::from_secs(config.cache_eviction_interval_secs));
        let cache: Arc<dyn ContextCache> = cache;

        let records = Arc::new(
            SecretRecordStore::new(rows, cache, Duration::from_secs(config.cache_ttl_secs))
                .with_sealed_fields(keyring.clone(), config.sealed_fields.clone()),
        );
        let service = Arc::new(SecretContextService::new(
            keyring.clone(),
            records.clone(),
            AuditLog::new(sink),
        ));

        info!(
            "Secret vault ready (key version {}, retired versions {:?})",
            keyring.active_version(),
            keyring.retired_versions()
        );

        Self {
            keyring,
            records,
            service,
            eviction_task,
        }
    }

    /// Stop background work.
    pub fn shutdown(self) {
        self.eviction_task.abort();
    }
}

/// Derive the active engine and every retired engine from configuration.
pub fn build_keyring(config: &VaultConfig) -> Result<Keyring> {
    let active = EncryptionEngine::new(&config.encryption_key, config.key_version, &config.kdf)?;
    let mut keyring = Keyring::new(active);
    for retired in &config.retired_keys {
        let engine = EncryptionEngine::new(&retired.key, retired.version, &config.kdf)?;
        keyring = keyring.with_retired(engine)?;
    }
    Ok(keyring)
}
