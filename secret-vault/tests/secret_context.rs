use std::sync::Arc;

use secret_vault::audit::{AuditOperation, AuditStatus, FileAuditSink, MemoryAuditSink};
use secret_vault::config::RetiredKey;
use secret_vault::security::KdfParams;
use secret_vault::storage::FileRowStore;
use secret_vault::{CredentialInput, SecretKind, SecretVaultError, SshKeyInput, VaultConfig, VaultState};
use zeroize::Zeroizing;

fn light_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

fn config(dir: &std::path::Path, key: &str, version: u32) -> VaultConfig {
    VaultConfig {
        encryption_key: Zeroizing::new(key.to_string()),
        key_version: version,
        kdf: light_kdf(),
        data_dir: Some(dir.to_path_buf()),
        ..VaultConfig::default()
    }
}

#[tokio::test]
async fn test_secrets_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let state = VaultState::from_config(&config(dir.path(), "operator", 1)).await.unwrap();
    state
        .service
        .store_credential(
            "acme",
            "alice",
            CredentialInput::new("openai_key", "sk-live-123", "api_key", "openai"),
        )
        .await
        .unwrap();
    state
        .service
        .store_ssh_key(
            "acme",
            "alice",
            SshKeyInput::new("deploy", "PRIVATE KEY", "ssh-ed25519 AAAA deploy", "ed25519"),
        )
        .await
        .unwrap();
    state.shutdown();

    let state = VaultState::from_config(&config(dir.path(), "operator", 1)).await.unwrap();
    assert_eq!(
        state
            .service
            .get_credential("acme", "alice", "openai_key")
            .await
            .unwrap()
            .as_deref(),
        Some("sk-live-123")
    );
    let ssh = state
        .service
        .get_ssh_key("acme", "alice", "deploy")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ssh.private_key, "PRIVATE KEY");

    let rows = std::fs::read_dir(dir.path().join("contexts")).unwrap().count();
    assert_eq!(rows, 1);
    state.shutdown();

    let audit = FileAuditSink::new(dir.path().join("audit.jsonl"))
        .read_all()
        .await
        .unwrap();
    let operations: Vec<_> = audit.iter().map(|e| e.operation).collect();
    assert_eq!(
        operations,
        vec![
            AuditOperation::Create,
            AuditOperation::Create,
            AuditOperation::Read,
            AuditOperation::Read
        ]
    );
    let raw = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
    assert!(!raw.contains("sk-live-123"));
    assert!(!raw.contains("PRIVATE KEY"));
}

#[tokio::test]
async fn test_wrong_operator_secret_cannot_read() {
    let dir = tempfile::tempdir().unwrap();

    let state = VaultState::from_config(&config(dir.path(), "right", 1)).await.unwrap();
    state
        .service
        .store_credential("acme", "alice", CredentialInput::new("k", "v", "api_key", "aws"))
        .await
        .unwrap();
    state.shutdown();

    let state = VaultState::from_config(&config(dir.path(), "wrong", 1)).await.unwrap();
    let err = state
        .service
        .get_credential("acme", "alice", "k")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SecretVaultError::SecretCorrupted {
            kind: SecretKind::Credential,
            ..
        }
    ));
    state.shutdown();
}

#[tokio::test]
async fn test_key_rotation_through_config() {
    let dir = tempfile::tempdir().unwrap();

    let state = VaultState::from_config(&config(dir.path(), "first", 1)).await.unwrap();
    state
        .service
        .store_credential("acme", "alice", CredentialInput::new("k", "v", "api_key", "aws"))
        .await
        .unwrap();
    state.shutdown();

    let rotated = VaultConfig {
        retired_keys: vec![RetiredKey {
            version: 1,
            key: Zeroizing::new("first".into()),
        }],
        ..config(dir.path(), "second", 2)
    };
    let state = VaultState::from_config(&rotated).await.unwrap();
    assert_eq!(
        state.service.reencrypt_context("acme", "alice").await.unwrap(),
        1
    );
    state.shutdown();

    // The retired key is no longer needed
    let state = VaultState::from_config(&config(dir.path(), "second", 2)).await.unwrap();
    assert_eq!(
        state
            .service
            .get_credential("acme", "alice", "k")
            .await
            .unwrap()
            .as_deref(),
        Some("v")
    );
    state.shutdown();
}

#[tokio::test]
async fn test_sealed_fields_hide_entry_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let sealed = VaultConfig {
        sealed_fields: vec!["credentials".into()],
        ..config(dir.path(), "operator", 1)
    };

    let state = VaultState::from_config(&sealed).await.unwrap();
    state
        .service
        .store_credential(
            "acme",
            "alice",
            CredentialInput::new("k", "v", "api_key", "very-distinctive-provider"),
        )
        .await
        .unwrap();
    assert_eq!(
        state.service.get_credential("acme", "alice", "k").await.unwrap().as_deref(),
        Some("v")
    );
    state.shutdown();

    let rows = FileRowStore::open(dir.path().join("contexts")).await.unwrap();
    let doc = secret_vault::storage::RowStore::find_by_composite_key(&rows, "acme", "alice")
        .await
        .unwrap()
        .unwrap();
    assert!(!doc.to_string().contains("very-distinctive-provider"));
    assert!(doc.get("__encrypted_fields").is_some());
}

#[tokio::test]
async fn test_assemble_with_custom_sink() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "operator", 1);
    let keyring = Arc::new(secret_vault::state::build_keyring(&config).unwrap());
    let sink = MemoryAuditSink::new();

    let state = VaultState::assemble(
        &config,
        keyring,
        Arc::new(secret_vault::storage::MemoryRowStore::new()),
        Arc::new(sink.clone()),
    );
    state
        .service
        .delete_secret("acme", "alice", SecretKind::Certificate, "missing")
        .await
        .unwrap();
    state.service.list_secrets("acme", "alice").await.unwrap();
    state.shutdown();

    let entries = sink.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, AuditOperation::List);
    assert_eq!(entries[0].status, AuditStatus::Success);
}
