//! Vault backend trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

use crate::config::VaultConfiguration;
use sessionvault_common::{Error, Passcode, Result, VaultKey};
use sessionvault_crypto::DatabaseKey;

/// Handle returned by [`VaultBackend::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHandle {
    /// Identifier of this backend instance.
    pub id: Uuid,
    /// Namespace the handle refers to.
    pub key: VaultKey,
}

/// Why a vault locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockReason {
    /// `lock()` was called.
    Explicit,
    /// The app stayed in background longer than the auto-lock delay.
    Backgrounded,
    /// The backend evicted the vault after repeated wrong passcodes.
    TooManyFailedAttempts,
}

/// A lock transition reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub reason: LockReason,
    pub at: DateTime<Utc>,
    /// The backend dropped the stored values instead of keeping them locked.
    pub values_discarded: bool,
}

impl LockEvent {
    /// Event for a lock happening now.
    ///
    /// An eviction after too many failed attempts always discards values.
    pub fn now(reason: LockReason) -> Self {
        Self {
            reason,
            at: Utc::now(),
            values_discarded: reason == LockReason::TooManyFailedAttempts,
        }
    }

    /// Event for a lock that wiped the stored values.
    pub fn discarding(reason: LockReason) -> Self {
        Self {
            values_discarded: true,
            ..Self::now(reason)
        }
    }
}

/// Observer notified once per lock transition.
///
/// Called synchronously on whichever thread caused the transition, possibly
/// while other vault operations are in flight. Implementations must not block.
pub trait LockListener: Send + Sync {
    fn on_lock(&self, event: &LockEvent);
}

impl<F> LockListener for F
where
    F: Fn(&LockEvent) + Send + Sync,
{
    fn on_lock(&self, event: &LockEvent) {
        self(event)
    }
}

/// Context of a custom passcode request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasscodeRequest {
    /// True when the backend is setting up a new passcode rather than
    /// verifying an existing one.
    pub is_set_request: bool,
}

/// Supplies custom passcodes when a backend asks for one.
#[async_trait]
pub trait PasscodeProvider: Send + Sync {
    /// Return the passcode for `request`.
    ///
    /// May involve user interaction of unbounded duration.
    async fn provide_passcode(&self, request: PasscodeRequest) -> Result<Passcode>;
}

/// Registered lock listeners and passcode provider of a backend.
///
/// Shared plumbing for backend implementations.
#[derive(Default)]
pub struct VaultEvents {
    lock_listeners: Mutex<Vec<Arc<dyn LockListener>>>,
    passcode_provider: Mutex<Option<Arc<dyn PasscodeProvider>>>,
}

impl VaultEvents {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lock listener.
    pub fn add_lock_listener(&self, listener: Arc<dyn LockListener>) {
        self.lock_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Replace the passcode provider.
    pub fn set_passcode_provider(&self, provider: Arc<dyn PasscodeProvider>) {
        *self
            .passcode_provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }

    /// Notify every lock listener.
    pub fn emit_lock(&self, event: LockEvent) {
        let listeners = self
            .lock_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        debug!("Emitting lock event {:?} to {} listeners", event.reason, listeners.len());
        for listener in listeners {
            listener.on_lock(&event);
        }
    }

    /// Ask the registered provider for a passcode.
    ///
    /// # Errors
    /// - `PermissionDenied` if no provider is registered
    /// - Any error returned by the provider
    pub async fn request_passcode(&self, request: PasscodeRequest) -> Result<Passcode> {
        let provider = self
            .passcode_provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match provider {
            Some(provider) => provider.provide_passcode(request).await,
            None => Err(Error::PermissionDenied(
                "No passcode provider registered".to_string(),
            )),
        }
    }
}

/// Encrypted, access-controlled key-value store bound to a device.
///
/// This is the capability the session vault manager is built on. How values
/// are encrypted is up to the implementation; callers only rely on the
/// contracts documented per method.
#[async_trait]
pub trait VaultBackend: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Initialize the vault.
    ///
    /// Idempotent. Backends without a native secure enclave require a
    /// database key and fail every other operation with
    /// `VaultUninitialized` until this has been called with one.
    async fn create(&self, key: Option<&DatabaseKey>) -> Result<VaultHandle>;

    /// Read a value, unlocking the vault first if it is locked.
    async fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value. Durable before it returns.
    async fn set_value(&self, key: &str, value: Value) -> Result<()>;

    /// Whether the vault holds no values. Never prompts for a credential.
    async fn is_empty(&self) -> Result<bool>;

    /// Whether the vault is locked. Never prompts for a credential.
    async fn is_locked(&self) -> Result<bool>;

    /// Irreversibly delete every value. Succeeds on an empty vault.
    async fn clear(&self) -> Result<()>;

    /// Current configuration.
    fn config(&self) -> VaultConfiguration;

    /// Atomically replace the configuration. Stored values are preserved.
    async fn update_config(&self, config: VaultConfiguration) -> Result<()>;

    /// Lock the vault now.
    async fn lock(&self) -> Result<()>;

    /// Unlock the vault, prompting for a credential if the storage class needs one.
    async fn unlock(&self) -> Result<()>;

    /// Register a listener for lock transitions.
    fn on_lock(&self, listener: Arc<dyn LockListener>);

    /// Register the provider asked for custom passcodes.
    fn on_passcode_requested(&self, provider: Arc<dyn PasscodeProvider>);
}
