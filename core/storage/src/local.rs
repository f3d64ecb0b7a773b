//! Encrypted file backend.
//!
//! Fallback store for platforms without a native secure enclave. Each vault
//! is one JSON envelope under the root directory holding the configuration
//! in clear and the values map sealed with a subkey of the database key.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::backend::{
    LockEvent, LockListener, LockReason, PasscodeProvider, VaultBackend, VaultEvents, VaultHandle,
};
use crate::config::{StorageClass, VaultConfiguration};
use sessionvault_common::{Error, Result, VaultKey};
use sessionvault_crypto::{decrypt, encrypt, DatabaseKey};

const ENVELOPE_VERSION: u32 = 1;
const VALUES_CONTEXT: &[u8] = b"vault-values";

/// On-disk vault format.
#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    config: VaultConfiguration,
    /// Base64 of nonce || ciphertext || tag.
    values: String,
}

struct OpenVault {
    values_key: DatabaseKey,
    values: HashMap<String, Value>,
}

/// File-backed vault.
///
/// Has no lock surface of its own: `is_locked` is always false and `lock`
/// only discards values when the storage class is `InMemory`.
pub struct LocalBackend {
    root: PathBuf,
    handle_id: Uuid,
    config: Mutex<VaultConfiguration>,
    vault: tokio::sync::Mutex<Option<OpenVault>>,
    events: VaultEvents,
}

impl LocalBackend {
    /// Create a backend storing vaults under `root`.
    ///
    /// Nothing touches the filesystem until [`VaultBackend::create`]. If a
    /// vault file already exists, its persisted configuration replaces
    /// `config` on create.
    pub fn new(root: impl AsRef<Path>, config: VaultConfiguration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            handle_id: Uuid::new_v4(),
            config: Mutex::new(config),
            vault: tokio::sync::Mutex::new(None),
            events: VaultEvents::new(),
        }
    }

    /// Path of the envelope for the configured vault.
    pub fn vault_path(&self) -> PathBuf {
        self.path_for(&self.config_guard().key)
    }

    fn path_for(&self, key: &VaultKey) -> PathBuf {
        self.root.join(format!("{}.vault", key))
    }

    fn config_guard(&self) -> MutexGuard<'_, VaultConfiguration> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn uninitialized(&self) -> Error {
        Error::VaultUninitialized(format!(
            "Vault '{}' has not been created",
            self.config_guard().key
        ))
    }

    fn handle(&self) -> VaultHandle {
        VaultHandle {
            id: self.handle_id,
            key: self.config_guard().key.clone(),
        }
    }

    /// Write the envelope for `config` and `values`.
    ///
    /// Values of an `InMemory` vault never reach the disk.
    async fn persist(
        &self,
        values_key: &DatabaseKey,
        config: &VaultConfiguration,
        values: &HashMap<String, Value>,
    ) -> Result<()> {
        let empty = HashMap::new();
        let persisted = if config.storage_class == StorageClass::InMemory {
            &empty
        } else {
            values
        };

        let plaintext = Zeroizing::new(serde_json::to_vec(persisted)?);
        let sealed = encrypt(
            values_key.as_bytes(),
            &plaintext,
            config.key.as_str().as_bytes(),
        )?;
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            config: config.clone(),
            values: STANDARD.encode(sealed),
        };
        let json = serde_json::to_vec_pretty(&envelope)?;

        fs::create_dir_all(&self.root).await?;
        let path = self.path_for(&config.key);
        let tmp = path.with_extension("vault.tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Persisted vault '{}' ({} values)", config.key, persisted.len());
        Ok(())
    }

    async fn load(
        &self,
        values_key: &DatabaseKey,
        key: &VaultKey,
        path: &Path,
    ) -> Result<(VaultConfiguration, HashMap<String, Value>)> {
        let data = fs::read(path).await?;
        let envelope: Envelope = serde_json::from_slice(&data)?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(Error::Serialization(format!(
                "Unsupported vault format version {}",
                envelope.version
            )));
        }
        if &envelope.config.key != key {
            return Err(Error::Serialization(format!(
                "Vault file belongs to '{}'",
                envelope.config.key
            )));
        }

        let sealed = STANDARD
            .decode(&envelope.values)
            .map_err(|e| Error::Serialization(format!("Invalid vault values: {}", e)))?;
        let plaintext = Zeroizing::new(decrypt(values_key.as_bytes(), &sealed, key.as_str().as_bytes())?);
        let values = serde_json::from_slice(&plaintext)?;

        Ok((envelope.config, values))
    }
}

#[async_trait]
impl VaultBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, key: Option<&DatabaseKey>) -> Result<VaultHandle> {
        let mut guard = self.vault.lock().await;
        if guard.is_some() {
            return Ok(self.handle());
        }

        let key = key.ok_or_else(|| {
            Error::VaultUninitialized("The local backend requires a database key".to_string())
        })?;
        let values_key = key.derive_subkey(VALUES_CONTEXT);
        let config = self.config_guard().clone();
        let path = self.path_for(&config.key);

        let values = if fs::try_exists(&path).await? {
            let (stored, values) = self.load(&values_key, &config.key, &path).await?;
            info!("Opened vault '{}' ({})", stored.key, stored.storage_class);
            *self.config_guard() = stored;
            values
        } else {
            self.persist(&values_key, &config, &HashMap::new()).await?;
            info!("Initialized vault '{}' at {}", config.key, path.display());
            HashMap::new()
        };

        *guard = Some(OpenVault { values_key, values });
        Ok(self.handle())
    }

    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let guard = self.vault.lock().await;
        let vault = guard.as_ref().ok_or_else(|| self.uninitialized())?;
        Ok(vault.values.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        let mut guard = self.vault.lock().await;
        let vault = guard.as_mut().ok_or_else(|| self.uninitialized())?;
        let config = self.config_guard().clone();

        let mut values = vault.values.clone();
        values.insert(key.to_string(), value);
        if config.storage_class != StorageClass::InMemory {
            self.persist(&vault.values_key, &config, &values).await?;
        }

        vault.values = values;
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool> {
        let guard = self.vault.lock().await;
        let vault = guard.as_ref().ok_or_else(|| self.uninitialized())?;
        Ok(vault.values.is_empty())
    }

    async fn is_locked(&self) -> Result<bool> {
        let guard = self.vault.lock().await;
        guard.as_ref().ok_or_else(|| self.uninitialized())?;
        Ok(false)
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.vault.lock().await;
        let vault = guard.as_mut().ok_or_else(|| self.uninitialized())?;
        let config = self.config_guard().clone();

        self.persist(&vault.values_key, &config, &HashMap::new()).await?;
        vault.values.clear();
        Ok(())
    }

    fn config(&self) -> VaultConfiguration {
        self.config_guard().clone()
    }

    async fn update_config(&self, config: VaultConfiguration) -> Result<()> {
        let mut guard = self.vault.lock().await;
        let vault = guard.as_mut().ok_or_else(|| self.uninitialized())?;

        let current_key = self.config_guard().key.clone();
        if config.key != current_key {
            return Err(Error::InvalidInput(format!(
                "Cannot move vault '{}' to '{}'",
                current_key, config.key
            )));
        }

        self.persist(&vault.values_key, &config, &vault.values).await?;
        info!(
            "Vault '{}' configured: {} / {:?}",
            config.key, config.storage_class, config.device_security
        );
        *self.config_guard() = config;
        Ok(())
    }

    async fn lock(&self) -> Result<()> {
        let mut guard = self.vault.lock().await;
        let vault = guard.as_mut().ok_or_else(|| self.uninitialized())?;

        let storage_class = self.config_guard().storage_class;
        if storage_class == StorageClass::InMemory {
            vault.values.clear();
            drop(guard);
            self.events
                .emit_lock(LockEvent::discarding(LockReason::Explicit));
        }
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        let guard = self.vault.lock().await;
        guard.as_ref().ok_or_else(|| self.uninitialized())?;
        Ok(())
    }

    fn on_lock(&self, listener: Arc<dyn LockListener>) {
        self.events.add_lock_listener(listener);
    }

    fn on_passcode_requested(&self, provider: Arc<dyn PasscodeProvider>) {
        self.events.set_passcode_provider(provider);
    }
}
