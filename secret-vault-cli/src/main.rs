//! Secret Vault operator tool
//!
//! Provisioning and maintenance helpers around the vault library:
//!
//! - `keygen`: print a fresh random operator secret
//! - `hash`: print the audit hash of a value, for correlating audit entries
//! - `doctor`: derive the configured keys and round-trip a probe secret
//! - `list` / `reencrypt`: inspect or rotate one identity's context
//!
//! The operator secret is read from the config file or
//! `SECRET_VAULT_ENCRYPTION_KEY`; it is never printed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secret_vault::audit::MemoryAuditSink;
use secret_vault::security::{generate_key, hash_content, Keyring, DEFAULT_GENERATED_KEY_BYTES};
use secret_vault::state::build_keyring;
use secret_vault::storage::MemoryRowStore;
use secret_vault::{load_config, CredentialInput, VaultConfig, VaultState};
use tracing::{info, warn};

const DOCTOR_IDENTITY: &str = "doctor";

/// Secret Vault operator tool
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, default_value = "vault.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a random operator secret (hex encoded)
    Keygen {
        /// Number of random bytes
        #[arg(long, default_value_t = DEFAULT_GENERATED_KEY_BYTES)]
        bytes: usize,
    },

    /// Print the SHA-256 audit hash of a value
    Hash { value: String },

    /// Check configuration, key derivation and storage
    Doctor,

    /// List secret metadata for one identity
    List {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        user: String,
    },

    /// Re-encrypt one identity's secrets under the active key version
    Reencrypt {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("secret_vault=info".parse()?)
                .add_directive("secret_vault_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Keygen { bytes } => {
            if bytes == 0 {
                bail!("--bytes must be positive");
            }
            println!("{}", generate_key(bytes));
        }
        Command::Hash { value } => {
            println!("{}", hash_content(&value));
        }
        Command::Doctor => doctor(&args.config).await?,
        Command::List { workspace, user } => {
            let state = open_state(&args.config).await?;
            let listing = state.service.list_secrets(&workspace, &user).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
            state.shutdown();
        }
        Command::Reencrypt { workspace, user } => {
            let state = open_state(&args.config).await?;
            let moved = state.service.reencrypt_context(&workspace, &user).await?;
            println!("{}", moved);
            state.shutdown();
        }
    }

    Ok(())
}

async fn open_state(path: &PathBuf) -> Result<VaultState> {
    let config = load_config(Some(path.as_path()))
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    if config.data_dir.is_none() {
        warn!("No data_dir configured; state will not outlive this process");
    }
    VaultState::from_config(&config)
        .await
        .context("Failed to initialize vault")
}

/// Run each check in order and report the first failure.
async fn doctor(path: &PathBuf) -> Result<()> {
    let config = load_config(Some(path.as_path()))
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    report("configuration", &format!("{:?}", path));

    let keyring = tokio::task::spawn_blocking({
        let config = config.clone();
        move || build_keyring(&config)
    })
    .await
    .context("Key derivation task panicked")?
    .context("Key derivation failed")?;
    report(
        "key derivation",
        &format!(
            "active version {}, retired {:?}",
            keyring.active_version(),
            keyring.retired_versions()
        ),
    );

    let probe = generate_key(16);
    let envelope = keyring
        .encrypt(&probe, None)
        .context("Probe encryption failed")?;
    let opened = keyring.decrypt(&envelope).context("Probe decryption failed")?;
    if opened != probe {
        bail!("Probe round trip returned a different value");
    }
    if !keyring.verify(&envelope) {
        bail!("Probe envelope failed verification");
    }
    report("encryption round trip", "ok");

    check_service(&config, Arc::new(keyring)).await?;

    check_storage(&config).await?;

    info!("All checks passed");
    Ok(())
}

/// Store and read back a probe credential through an ephemeral service.
async fn check_service(config: &VaultConfig, keyring: Arc<Keyring>) -> Result<()> {
    let sink = MemoryAuditSink::new();
    let state = VaultState::assemble(
        config,
        keyring,
        Arc::new(MemoryRowStore::new()),
        Arc::new(sink.clone()),
    );

    let value = generate_key(16);
    state
        .service
        .store_credential(
            DOCTOR_IDENTITY,
            DOCTOR_IDENTITY,
            CredentialInput::new("probe", value.as_str(), "probe", "doctor"),
        )
        .await
        .context("Probe store failed")?;
    let read = state
        .service
        .get_credential(DOCTOR_IDENTITY, DOCTOR_IDENTITY, "probe")
        .await
        .context("Probe read failed")?;
    state.shutdown();

    if read.as_deref() != Some(value.as_str()) {
        bail!("Service round trip returned a different value");
    }
    report("service round trip", &format!("{} audit entries", sink.len().await));
    Ok(())
}

async fn check_storage(config: &VaultConfig) -> Result<()> {
    let Some(dir) = &config.data_dir else {
        report("storage", "in-memory (no data_dir)");
        return Ok(());
    };

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Cannot create data directory {:?}", dir))?;
    let probe = dir.join(".doctor-probe");
    tokio::fs::write(&probe, b"probe")
        .await
        .with_context(|| format!("Data directory {:?} is not writable", dir))?;
    tokio::fs::remove_file(&probe).await?;
    report("storage", &format!("{:?} writable", dir));
    Ok(())
}

fn report(check: &str, detail: &str) {
    println!("[ok] {:<24} {}", check, detail);
}
