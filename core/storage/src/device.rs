//! Device capability queries.
//!
//! The unlock policy needs to know what the platform offers (a native lock
//! surface, a system passcode, biometrics) and needs to request biometric
//! permission before a `DeviceSecurity` vault is usable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use sessionvault_common::{Error, Result};

/// OS-level biometric permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiometricPermission {
    /// The user has not decided yet.
    Prompt,
    Granted,
    Denied,
}

/// Platform capabilities consumed by the unlock policy.
#[async_trait]
pub trait DeviceCapabilities: Send + Sync {
    /// Whether the app runs on a platform with a native lock/biometric surface.
    ///
    /// False for pure web contexts.
    fn is_native_platform(&self) -> bool;

    /// Whether the device exposes a native locking primitive.
    async fn has_secure_hardware(&self) -> Result<bool>;

    /// Whether a system passcode/PIN/pattern is set.
    async fn is_system_passcode_set(&self) -> Result<bool>;

    /// Whether biometrics are enrolled and enabled.
    async fn is_biometrics_enabled(&self) -> Result<bool>;

    /// Current biometric permission state.
    async fn biometric_permission(&self) -> Result<BiometricPermission>;

    /// Ask the user for biometric permission with a localized justification.
    async fn show_biometric_prompt(&self, reason: &str) -> Result<()>;
}

/// Device without any lock surface (CLI, server, browser).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessDevice;

#[async_trait]
impl DeviceCapabilities for HeadlessDevice {
    fn is_native_platform(&self) -> bool {
        false
    }

    async fn has_secure_hardware(&self) -> Result<bool> {
        Ok(false)
    }

    async fn is_system_passcode_set(&self) -> Result<bool> {
        Ok(false)
    }

    async fn is_biometrics_enabled(&self) -> Result<bool> {
        Ok(false)
    }

    async fn biometric_permission(&self) -> Result<BiometricPermission> {
        Ok(BiometricPermission::Denied)
    }

    async fn show_biometric_prompt(&self, _reason: &str) -> Result<()> {
        Err(Error::PermissionDenied(
            "Biometrics are not available on this device".to_string(),
        ))
    }
}

/// Configurable device used in tests and demos.
///
/// Records every biometric prompt. A prompt resolves the permission to
/// `Granted`, or to `Denied` when the simulated user refuses.
pub struct SimulatedDevice {
    native: AtomicBool,
    secure_hardware: AtomicBool,
    system_passcode: AtomicBool,
    biometrics: AtomicBool,
    refuse_prompts: AtomicBool,
    permission: Mutex<BiometricPermission>,
    prompts: AtomicUsize,
    last_reason: Mutex<Option<String>>,
}

impl SimulatedDevice {
    /// A phone with secure hardware, a system passcode and biometrics,
    /// whose user has not been asked for biometric permission yet.
    pub fn native() -> Self {
        Self {
            native: AtomicBool::new(true),
            secure_hardware: AtomicBool::new(true),
            system_passcode: AtomicBool::new(true),
            biometrics: AtomicBool::new(true),
            refuse_prompts: AtomicBool::new(false),
            permission: Mutex::new(BiometricPermission::Prompt),
            prompts: AtomicUsize::new(0),
            last_reason: Mutex::new(None),
        }
    }

    /// A browser: no native platform and no lock surface.
    pub fn web() -> Self {
        let device = Self::native();
        device.native.store(false, Ordering::SeqCst);
        device.secure_hardware.store(false, Ordering::SeqCst);
        device.system_passcode.store(false, Ordering::SeqCst);
        device.biometrics.store(false, Ordering::SeqCst);
        device
    }

    /// Set the biometric permission state.
    pub fn with_permission(self, permission: BiometricPermission) -> Self {
        self.set_permission(permission);
        self
    }

    /// Set whether a system passcode is configured.
    pub fn with_system_passcode(self, set: bool) -> Self {
        self.system_passcode.store(set, Ordering::SeqCst);
        self
    }

    /// Set whether biometrics are enabled.
    pub fn with_biometrics(self, enabled: bool) -> Self {
        self.biometrics.store(enabled, Ordering::SeqCst);
        self
    }

    /// Set whether the device has a native locking primitive.
    pub fn with_secure_hardware(self, present: bool) -> Self {
        self.secure_hardware.store(present, Ordering::SeqCst);
        self
    }

    /// Make the simulated user refuse biometric prompts.
    pub fn refusing_prompts(self) -> Self {
        self.refuse_prompts.store(true, Ordering::SeqCst);
        self
    }

    /// Change the native-platform flag.
    pub fn set_native(&self, native: bool) {
        self.native.store(native, Ordering::SeqCst);
    }

    /// Change the biometric permission state.
    pub fn set_permission(&self, permission: BiometricPermission) {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner) = permission;
    }

    /// Number of biometric prompts shown so far.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Justification shown with the most recent prompt.
    pub fn last_prompt_reason(&self) -> Option<String> {
        self.last_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeviceCapabilities for SimulatedDevice {
    fn is_native_platform(&self) -> bool {
        self.native.load(Ordering::SeqCst)
    }

    async fn has_secure_hardware(&self) -> Result<bool> {
        Ok(self.secure_hardware.load(Ordering::SeqCst))
    }

    async fn is_system_passcode_set(&self) -> Result<bool> {
        Ok(self.system_passcode.load(Ordering::SeqCst))
    }

    async fn is_biometrics_enabled(&self) -> Result<bool> {
        Ok(self.biometrics.load(Ordering::SeqCst))
    }

    async fn biometric_permission(&self) -> Result<BiometricPermission> {
        Ok(*self.permission.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn show_biometric_prompt(&self, reason: &str) -> Result<()> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        *self.last_reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());

        let outcome = if self.refuse_prompts.load(Ordering::SeqCst) {
            BiometricPermission::Denied
        } else {
            BiometricPermission::Granted
        };
        self.set_permission(outcome);
        Ok(())
    }
}
