//! Database key provisioning.
//!
//! The fallback encrypted store needs a stable key across launches. The key
//! is generated once, wrapped under an Argon2id key derived from a device
//! secret, and written next to the store. Later launches unwrap it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::aead::{decrypt, encrypt};
use crate::kdf::{derive_wrapping_key, KdfParams};
use crate::keys::{DatabaseKey, Salt, KEY_LENGTH, SALT_LENGTH};
use sessionvault_common::{Error, Result};

const KEY_FILE_VERSION: u32 = 1;
const KEY_FILE_AAD: &[u8] = b"sessionvault-database-key-v1";

/// On-disk form of a wrapped database key.
#[derive(Debug, Serialize, Deserialize)]
struct WrappedKeyFile {
    version: u32,
    salt: String,
    kdf_params: KdfParams,
    wrapped_key: String,
}

/// Retrieves the database key, creating it on first use.
#[derive(Debug, Clone)]
pub struct KeyProvisioner {
    path: PathBuf,
    params: KdfParams,
}

impl KeyProvisioner {
    /// Create a provisioner backed by the key file at `path`.
    ///
    /// `params` only applies when a new key file is written; existing files
    /// carry their own parameters.
    pub fn new(path: impl AsRef<Path>, params: KdfParams) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            params,
        }
    }

    /// Path of the wrapped key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a key has already been provisioned.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Return the database key, generating and persisting it if needed.
    ///
    /// # Errors
    /// - `PermissionDenied` if `device_secret` does not unwrap the stored key
    /// - I/O or serialization failures reading or writing the key file
    pub fn provision(&self, device_secret: &[u8]) -> Result<DatabaseKey> {
        if self.exists() {
            self.retrieve(device_secret)
        } else {
            self.create(device_secret)
        }
    }

    fn retrieve(&self, device_secret: &[u8]) -> Result<DatabaseKey> {
        debug!("Unwrapping database key from {}", self.path.display());

        let file: WrappedKeyFile = serde_json::from_slice(&fs::read(&self.path)?)?;
        if file.version != KEY_FILE_VERSION {
            return Err(Error::Crypto(format!(
                "Unsupported key file version: {}",
                file.version
            )));
        }

        let salt: [u8; SALT_LENGTH] = decode_fixed(&file.salt, "salt")?;
        let wrapped = STANDARD
            .decode(&file.wrapped_key)
            .map_err(|e| Error::Serialization(format!("Invalid wrapped key encoding: {}", e)))?;

        let wrapping_key =
            derive_wrapping_key(device_secret, &Salt::from_bytes(salt), &file.kdf_params)?;
        let raw = decrypt(wrapping_key.as_bytes(), &wrapped, KEY_FILE_AAD)
            .map(Zeroizing::new)
            .map_err(|_| {
                Error::PermissionDenied(
                    "Device secret does not unwrap the database key".to_string(),
                )
            })?;

        let key: [u8; KEY_LENGTH] = raw
            .as_slice()
            .try_into()
            .map_err(|_| Error::Crypto("Unwrapped key has the wrong length".to_string()))?;
        Ok(DatabaseKey::from_bytes(key))
    }

    fn create(&self, device_secret: &[u8]) -> Result<DatabaseKey> {
        info!("Provisioning new database key at {}", self.path.display());

        let key = DatabaseKey::generate();
        let salt = Salt::generate();
        let wrapping_key = derive_wrapping_key(device_secret, &salt, &self.params)?;
        let wrapped = encrypt(wrapping_key.as_bytes(), key.as_bytes(), KEY_FILE_AAD)?;

        let file = WrappedKeyFile {
            version: KEY_FILE_VERSION,
            salt: STANDARD.encode(salt.as_bytes()),
            kdf_params: self.params.clone(),
            wrapped_key: STANDARD.encode(wrapped),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        fs::rename(&tmp, &self.path)?;

        Ok(key)
    }
}

fn decode_fixed<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N]> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Serialization(format!("Invalid {} encoding: {}", what, e)))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Serialization(format!("Invalid {} length", what)))
}
