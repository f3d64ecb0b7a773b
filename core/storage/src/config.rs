//! Backend configuration record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use sessionvault_common::VaultKey;

/// How the backend protects persisted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    /// Encrypted at rest, never asks for a credential.
    SecureStorage,
    /// Gated by the device's own credentials (biometrics and/or system passcode).
    DeviceSecurity,
    /// Gated by an application-supplied passcode.
    CustomPasscode,
    /// Values live only in memory and are discarded on lock.
    InMemory,
}

impl StorageClass {
    /// Whether vaults of this class can enter a locked state.
    pub fn is_lockable(&self) -> bool {
        matches!(self, StorageClass::DeviceSecurity | StorageClass::CustomPasscode)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageClass::SecureStorage => "SecureStorage",
            StorageClass::DeviceSecurity => "DeviceSecurity",
            StorageClass::CustomPasscode => "CustomPasscode",
            StorageClass::InMemory => "InMemory",
        };
        f.write_str(name)
    }
}

/// Which device credentials unlock a `DeviceSecurity` vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceSecurityClass {
    None,
    SystemPasscode,
    Biometrics,
    Both,
}

/// Full backend configuration.
///
/// Owned by the backend. Callers read the current record and write a
/// complete replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultConfiguration {
    /// Vault namespace.
    pub key: VaultKey,
    pub storage_class: StorageClass,
    pub device_security: DeviceSecurityClass,
    /// Time in background after which the vault locks, in milliseconds.
    pub auto_lock_delay_ms: u64,
    /// Wrong custom passcodes tolerated before eviction.
    pub max_failed_passcode_attempts: u32,
    pub clear_on_too_many_failed_attempts: bool,
    pub unlock_on_load: bool,
}

impl VaultConfiguration {
    /// Default configuration for the given namespace.
    pub fn new(key: VaultKey) -> Self {
        Self {
            key,
            storage_class: StorageClass::SecureStorage,
            device_security: DeviceSecurityClass::None,
            auto_lock_delay_ms: 5000,
            max_failed_passcode_attempts: 2,
            clear_on_too_many_failed_attempts: true,
            unlock_on_load: false,
        }
    }

    /// Background duration that triggers an automatic lock.
    pub fn auto_lock_delay(&self) -> Duration {
        Duration::from_millis(self.auto_lock_delay_ms)
    }

    /// Copy of this configuration with the storage and device-security
    /// classes replaced; every other field is preserved.
    pub fn with_classes(&self, storage_class: StorageClass, device_security: DeviceSecurityClass) -> Self {
        Self {
            storage_class,
            device_security,
            ..self.clone()
        }
    }
}

impl Default for VaultConfiguration {
    fn default() -> Self {
        Self::new(VaultKey::default())
    }
}
