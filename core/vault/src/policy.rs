//! Unlock modes and the policy mapping them onto backend configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use sessionvault_common::{Error, Result};
use sessionvault_storage::{
    BiometricPermission, DeviceCapabilities, DeviceSecurityClass, StorageClass,
    VaultConfiguration,
};

/// Which credential class gates the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnlockMode {
    /// Biometrics with system passcode fallback.
    Device,
    /// System passcode only.
    #[serde(rename = "SystemPIN")]
    SystemPin,
    /// Application-supplied custom passcode.
    #[serde(rename = "SessionPIN")]
    SessionPin,
    /// Session kept in memory only; every lock forces a new login.
    ForceLogin,
    /// Encrypted at rest, never locks.
    #[default]
    NeverLock,
}

impl UnlockMode {
    /// Every mode, in menu order.
    pub const ALL: [UnlockMode; 5] = [
        UnlockMode::Device,
        UnlockMode::SystemPin,
        UnlockMode::SessionPin,
        UnlockMode::ForceLogin,
        UnlockMode::NeverLock,
    ];

    /// Symbolic name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockMode::Device => "Device",
            UnlockMode::SystemPin => "SystemPIN",
            UnlockMode::SessionPin => "SessionPIN",
            UnlockMode::ForceLogin => "ForceLogin",
            UnlockMode::NeverLock => "NeverLock",
        }
    }

    /// Recover the mode a backend configuration was derived from.
    pub fn from_configuration(config: &VaultConfiguration) -> Self {
        match config.storage_class {
            StorageClass::DeviceSecurity => match config.device_security {
                DeviceSecurityClass::Both | DeviceSecurityClass::Biometrics => UnlockMode::Device,
                DeviceSecurityClass::SystemPasscode | DeviceSecurityClass::None => {
                    UnlockMode::SystemPin
                }
            },
            StorageClass::CustomPasscode => UnlockMode::SessionPin,
            StorageClass::InMemory => UnlockMode::ForceLogin,
            StorageClass::SecureStorage => UnlockMode::NeverLock,
        }
    }
}

impl fmt::Display for UnlockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnlockMode {
    type Err = Error;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        UnlockMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("Unknown unlock mode: {}", s)))
    }
}

/// Backend classes an unlock mode resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockPolicy {
    pub storage_class: StorageClass,
    pub device_security: DeviceSecurityClass,
    /// Biometric permission must be provisioned before applying.
    pub requires_provisioning: bool,
}

impl UnlockPolicy {
    /// Merge this policy into `config`, preserving every other field.
    pub fn apply_to(&self, config: &VaultConfiguration) -> VaultConfiguration {
        config.with_classes(self.storage_class, self.device_security)
    }
}

/// Resolve an unlock mode to its backend policy.
pub fn resolve(mode: UnlockMode) -> UnlockPolicy {
    let (storage_class, device_security, requires_provisioning) = match mode {
        UnlockMode::Device => (StorageClass::DeviceSecurity, DeviceSecurityClass::Both, true),
        UnlockMode::SystemPin => (
            StorageClass::DeviceSecurity,
            DeviceSecurityClass::SystemPasscode,
            true,
        ),
        UnlockMode::SessionPin => (StorageClass::CustomPasscode, DeviceSecurityClass::None, false),
        UnlockMode::ForceLogin => (StorageClass::InMemory, DeviceSecurityClass::None, false),
        UnlockMode::NeverLock => (StorageClass::SecureStorage, DeviceSecurityClass::None, false),
    };

    UnlockPolicy {
        storage_class,
        device_security,
        requires_provisioning,
    }
}

/// Ask for biometric permission if the user has not decided yet.
///
/// Already granted or denied permissions are left alone.
pub async fn provision(device: &dyn DeviceCapabilities, reason: &str) -> Result<()> {
    match device.biometric_permission().await? {
        BiometricPermission::Prompt => {
            info!("Requesting biometric permission");
            device.show_biometric_prompt(reason).await
        }
        permission => {
            debug!("Biometric permission already {:?}", permission);
            Ok(())
        }
    }
}

/// Pick the strongest unlock mode the device supports.
pub async fn select_unlock_mode(device: &dyn DeviceCapabilities) -> Result<UnlockMode> {
    if !device.is_native_platform() || !device.has_secure_hardware().await? {
        return Ok(UnlockMode::NeverLock);
    }

    let mode = if device.is_system_passcode_set().await? {
        if device.is_biometrics_enabled().await? {
            UnlockMode::Device
        } else {
            UnlockMode::SystemPin
        }
    } else {
        UnlockMode::NeverLock
    };
    Ok(mode)
}
