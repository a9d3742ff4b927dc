//! Vault configuration: JSON file with environment overrides.
//!
//! The operator secret is the only setting without a default. It never
//! appears in `Debug` output and is zeroized when the config is dropped.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{Result, SecretVaultError};
use crate::security::KdfParams;
use crate::storage::is_sealable_field;

pub const ENV_ENCRYPTION_KEY: &str = "SECRET_VAULT_ENCRYPTION_KEY";
pub const ENV_KEY_VERSION: &str = "SECRET_VAULT_KEY_VERSION";
pub const ENV_CACHE_TTL_SECS: &str = "SECRET_VAULT_CACHE_TTL_SECS";
pub const ENV_DATA_DIR: &str = "SECRET_VAULT_DATA_DIR";

/// Operator secret of a previous key version, kept for decryption and
/// re-encryption only.
#[derive(Clone, Serialize, Deserialize)]
pub struct RetiredKey {
    pub version: u32,
    pub key: Zeroizing<String>,
}

impl std::fmt::Debug for RetiredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetiredKey")
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub encryption_key: Zeroizing<String>,
    pub key_version: u32,
    pub retired_keys: Vec<RetiredKey>,
    pub kdf: KdfParams,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub cache_eviction_interval_secs: u64,
    /// Top-level document fields encrypted a second time at rest.
    pub sealed_fields: Vec<String>,
    /// File-backed storage and audit log when set; in-memory otherwise.
    pub data_dir: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            encryption_key: Zeroizing::new(String::new()),
            key_version: 1,
            retired_keys: Vec::new(),
            kdf: KdfParams::default(),
            cache_ttl_secs: 300,
            cache_capacity: 1024,
            cache_eviction_interval_secs: 60,
            sealed_fields: Vec::new(),
            data_dir: None,
        }
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("encryption_key", &"[REDACTED]")
            .field("key_version", &self.key_version)
            .field("retired_keys", &self.retired_keys)
            .field("kdf", &self.kdf)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("cache_capacity", &self.cache_capacity)
            .field("cache_eviction_interval_secs", &self.cache_eviction_interval_secs)
            .field("sealed_fields", &self.sealed_fields)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl VaultConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = var(ENV_ENCRYPTION_KEY) {
            self.encryption_key = Zeroizing::new(key);
        }
        if let Some(version) = var(ENV_KEY_VERSION) {
            self.key_version = version.trim().parse().map_err(|_| {
                SecretVaultError::Config(format!("{} must be an integer", ENV_KEY_VERSION))
            })?;
        }
        if let Some(ttl) = var(ENV_CACHE_TTL_SECS) {
            self.cache_ttl_secs = ttl.trim().parse().map_err(|_| {
                SecretVaultError::Config(format!("{} must be an integer", ENV_CACHE_TTL_SECS))
            })?;
        }
        if let Some(dir) = var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.encryption_key.trim().is_empty() {
            return Err(SecretVaultError::Config(format!(
                "encryption key is required (set {})",
                ENV_ENCRYPTION_KEY
            )));
        }
        if self.key_version == 0 {
            return Err(SecretVaultError::Config("key_version must be at least 1".into()));
        }

        let mut seen = vec![self.key_version];
        for retired in &self.retired_keys {
            if seen.contains(&retired.version) {
                return Err(SecretVaultError::Config(format!(
                    "key version {} is configured more than once",
                    retired.version
                )));
            }
            if retired.key.trim().is_empty() {
                return Err(SecretVaultError::Config(format!(
                    "retired key version {} has an empty key",
                    retired.version
                )));
            }
            seen.push(retired.version);
        }

        if self.cache_ttl_secs == 0 {
            return Err(SecretVaultError::Config("cache_ttl_secs must be positive".into()));
        }
        if self.cache_eviction_interval_secs == 0 {
            return Err(SecretVaultError::Config(
                "cache_eviction_interval_secs must be positive".into(),
            ));
        }
        if let Some(name) = self.sealed_fields.iter().find(|name| !is_sealable_field(name)) {
            return Err(SecretVaultError::Config(format!(
                "sealed_fields cannot include '{}': identity and bookkeeping fields stay in clear",
                name
            )));
        }
        if self.kdf.parallelism == 0 || self.kdf.memory_kib < 8 * self.kdf.parallelism {
            return Err(SecretVaultError::Config(
                "kdf.memory_kib must be at least 8 KiB per lane".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from `path` (defaults when absent or missing), then
/// apply environment overrides and validate.
pub fn load_config(path: Option<&Path>) -> Result<VaultConfig> {
    load_config_with(path, |name| std::env::var(name).ok())
}

fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<VaultConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) if path.exists() => {
            info!("Loading vault configuration from {:?}", path);
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| SecretVaultError::Config(format!("{:?}: {}", path, e)))?
        }
        Some(path) => {
            debug!("No configuration file at {:?}, using defaults", path);
            VaultConfig::default()
        }
        None => VaultConfig::default(),
    };

    config.apply_env_from(lookup)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_need_a_key() {
        let config = VaultConfig::default();
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.key_version, 1);
        assert!(matches!(config.validate(), Err(SecretVaultError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = VaultConfig::default();
        config
            .apply_env_from(lookup(&[
                (ENV_ENCRYPTION_KEY, "operator"),
                (ENV_KEY_VERSION, "4"),
                (ENV_CACHE_TTL_SECS, "120"),
                (ENV_DATA_DIR, "/var/lib/vault"),
            ]))
            .unwrap();

        assert_eq!(config.encryption_key.as_str(), "operator");
        assert_eq!(config.key_version, 4);
        assert_eq!(config.cache_ttl_secs, 120);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/vault")));
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = VaultConfig::default();
        let result = config.apply_env_from(lookup(&[(ENV_KEY_VERSION, "two")]));
        assert!(matches!(result, Err(SecretVaultError::Config(_))));
    }

    #[test]
    fn test_duplicate_versions_rejected() {
        let config = VaultConfig {
            encryption_key: Zeroizing::new("current".into()),
            key_version: 2,
            retired_keys: vec![RetiredKey {
                version: 2,
                key: Zeroizing::new("old".into()),
            }],
            ..VaultConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identity_fields_cannot_be_sealed() {
        let base = VaultConfig {
            encryption_key: Zeroizing::new("operator".into()),
            ..VaultConfig::default()
        };
        for field in ["workspace_id", "user_id", "id", "__encrypted_fields"] {
            let config = VaultConfig {
                sealed_fields: vec!["credentials".into(), field.into()],
                ..base.clone()
            };
            assert!(
                matches!(config.validate(), Err(SecretVaultError::Config(_))),
                "{} accepted",
                field
            );
        }

        let config = VaultConfig {
            sealed_fields: vec!["credentials".into(), "ssh_keys".into()],
            ..base
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = VaultConfig {
            encryption_key: Zeroizing::new("super-secret-operator-key".into()),
            retired_keys: vec![RetiredKey {
                version: 0,
                key: Zeroizing::new("older-secret".into()),
            }],
            ..VaultConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-operator-key"));
        assert!(!rendered.contains("older-secret"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        std::fs::write(
            &path,
            r#"{"encryption_key": "from-file", "cache_ttl_secs": 90, "sealed_fields": ["credentials"]}"#,
        )
        .unwrap();

        let config = load_config_with(Some(&path), lookup(&[])).unwrap();
        assert_eq!(config.encryption_key.as_str(), "from-file");
        assert_eq!(config.cache_ttl_secs, 90);
        assert_eq!(config.sealed_fields, vec!["credentials".to_string()]);
        assert_eq!(config.kdf, KdfParams::default());
    }

    #[test]
    fn test_missing_file_uses_defaults_plus_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let config =
            load_config_with(Some(&path), lookup(&[(ENV_ENCRYPTION_KEY, "from-env")])).unwrap();
        assert_eq!(config.encryption_key.as_str(), "from-env");
        assert!(load_config_with(Some(&path), lookup(&[])).is_err());
    }
}
