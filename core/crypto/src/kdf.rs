//! Key derivation using Argon2id.
//!
//! Device secrets are low-entropy, so every key derived from one goes
//! through a memory-hard function first.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{DatabaseKey, Salt, WrappingKey, KEY_LENGTH};
use sessionvault_common::{Error, Result};

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Parameters suitable for desktop use.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Minimal parameters. Only for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

fn derive_raw(secret: &[u8], salt: &Salt, params: &KdfParams) -> Result<[u8; KEY_LENGTH]> {
    if secret.is_empty() {
        return Err(Error::InvalidInput("Secret cannot be empty".to_string()));
    }

    let mut key_bytes = [0u8; KEY_LENGTH];
    params
        .to_argon2()?
        .hash_password_into(secret, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(key_bytes)
}

/// Derive the key that wraps the stored database key.
///
/// # Errors
/// - Returns error if `secret` is empty
/// - Returns error if Argon2id parameters are invalid
pub fn derive_wrapping_key(secret: &[u8], salt: &Salt, params: &KdfParams) -> Result<WrappingKey> {
    derive_raw(secret, salt, params).map(WrappingKey::from_bytes)
}

/// Derive a database key directly from a secret.
///
/// For deployments that can reproduce the secret on every launch and do not
/// want a wrapped key file on disk.
pub fn derive_database_key(secret: &[u8], salt: &Salt, params: &KdfParams) -> Result<DatabaseKey> {
    derive_raw(secret, salt, params).map(DatabaseKey::from_bytes)
}
