//! In-memory vault backend.
//!
//! Behaves like a native secure-enclave vault without touching the
//! keystore: it locks, asks for custom passcodes, evicts after too many
//! wrong passcodes and auto-locks after backgrounding. Every call is counted
//! and failures can be injected, which makes it the reference backend for
//! exercising the policy layer.

use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    LockEvent, LockListener, LockReason, PasscodeProvider, PasscodeRequest, VaultBackend,
    VaultEvents, VaultHandle,
};
use crate::config::{StorageClass, VaultConfiguration};
use sessionvault_common::{Error, Passcode, Result};
use sessionvault_crypto::DatabaseKey;

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetValue,
    SetValue,
    IsEmpty,
    IsLocked,
    Clear,
    UpdateConfig,
    Lock,
    Unlock,
}

type PasscodeDigest = [u8; 32];

struct State {
    config: VaultConfiguration,
    values: HashMap<String, Value>,
    locked: bool,
    passcode: Option<PasscodeDigest>,
    failed_attempts: u32,
    backgrounded_at: Option<Instant>,
    failures: Vec<(Operation, Error)>,
}

enum PasscodeOutcome {
    Accepted,
    Rejected(u32),
    Evicted(u32),
}

/// In-memory vault backend.
///
/// All data is lost on drop.
pub struct MemoryBackend {
    handle_id: Uuid,
    state: Mutex<State>,
    events: VaultEvents,
    device_auth_allowed: AtomicBool,
    latency_ms: AtomicU64,
    reads: AtomicUsize,
    writes: AtomicUsize,
    clears: AtomicUsize,
    config_updates: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty, unlocked backend with the default configuration.
    pub fn new() -> Self {
        Self::with_config(VaultConfiguration::default())
    }

    /// Create an empty, unlocked backend with `config`.
    pub fn with_config(config: VaultConfiguration) -> Self {
        Self {
            handle_id: Uuid::new_v4(),
            state: Mutex::new(State {
                config,
                values: HashMap::new(),
                locked: false,
                passcode: None,
                failed_attempts: 0,
                backgrounded_at: None,
                failures: Vec::new(),
            }),
            events: VaultEvents::new(),
            device_auth_allowed: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
            config_updates: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every I/O call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: Error) {
        self.state().failures.push((operation, error));
    }

    /// Decide whether device authentication (biometrics or system passcode)
    /// succeeds when a `DeviceSecurity` vault is unlocked.
    pub fn set_device_auth_allowed(&self, allowed: bool) {
        self.device_auth_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Number of `get_value` calls.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set_value` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `clear` calls.
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Number of `update_config` calls.
    pub fn config_updates(&self) -> usize {
        self.config_updates.load(Ordering::SeqCst)
    }

    /// Peek at a stored value without unlocking or counting a read.
    pub fn stored_value(&self, key: &str) -> Option<Value> {
        self.state().values.get(key).cloned()
    }

    /// Record that the app moved to the background.
    pub fn enter_background(&self) {
        self.state().backgrounded_at = Some(Instant::now());
    }

    /// Record that the app returned to the foreground.
    ///
    /// Locks the vault if it spent at least the auto-lock delay in background.
    pub fn enter_foreground(&self) {
        let expired = {
            let mut state = self.state();
            match state.backgrounded_at.take() {
                Some(since) => since.elapsed() >= state.config.auto_lock_delay(),
                None => false,
            }
        };

        if expired {
            info!("Auto-lock delay exceeded while in background");
            self.lock_with_reason(LockReason::Backgrounded);
        }
    }

    /// Apply a lock transition. Emits at most one event per transition.
    fn lock_with_reason(&self, reason: LockReason) -> bool {
        let event = {
            let mut state = self.state();
            match state.config.storage_class {
                StorageClass::SecureStorage => None,
                StorageClass::InMemory => {
                    state.values.clear();
                    Some(LockEvent::discarding(reason))
                }
                StorageClass::DeviceSecurity | StorageClass::CustomPasscode => {
                    if state.locked {
                        None
                    } else {
                        state.locked = true;
                        Some(LockEvent::now(reason))
                    }
                }
            }
        };

        match event {
            Some(event) => {
                self.events.emit_lock(event);
                true
            }
            None => false,
        }
    }

    async fn simulate_io(&self, operation: Operation) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let mut state = self.state();
        match state.failures.iter().position(|(op, _)| *op == operation) {
            Some(index) => Err(state.failures.remove(index).1),
            None => Ok(()),
        }
    }

    async fn ensure_unlocked(&self) -> Result<()> {
        let locked = self.state().locked;
        if locked {
            self.unlock().await
        } else {
            Ok(())
        }
    }

    async fn unlock_with_passcode(&self) -> Result<()> {
        let is_set_request = self.state().passcode.is_none();
        let passcode = self
            .events
            .request_passcode(PasscodeRequest { is_set_request })
            .await?;
        let supplied = digest(&passcode);

        let outcome = {
            let mut state = self.state();
            let current = state.passcode;
            match current {
                None => {
                    state.passcode = Some(supplied);
                    PasscodeOutcome::Accepted
                }
                Some(expected) if bool::from(expected[..].ct_eq(&supplied[..])) => {
                    PasscodeOutcome::Accepted
                }
                Some(_) => {
                    state.failed_attempts += 1;
                    let attempts = state.failed_attempts;
                    if attempts >= state.config.max_failed_passcode_attempts
                        && state.config.clear_on_too_many_failed_attempts
                    {
                        state.values.clear();
                        state.passcode = None;
                        state.failed_attempts = 0;
                        state.locked = false;
                        PasscodeOutcome::Evicted(attempts)
                    } else {
                        PasscodeOutcome::Rejected(attempts)
                    }
                }
            }
        };

        match outcome {
            PasscodeOutcome::Accepted => {
                let mut state = self.state();
                state.locked = false;
                state.failed_attempts = 0;
                Ok(())
            }
            PasscodeOutcome::Rejected(attempts) => {
                warn!("Wrong custom passcode (attempt {})", attempts);
                Err(Error::InvalidPasscode)
            }
            PasscodeOutcome::Evicted(attempts) => {
                warn!("Vault cleared after {} failed passcode attempts", attempts);
                self.events
                    .emit_lock(LockEvent::now(LockReason::TooManyFailedAttempts));
                Err(Error::TooManyFailedAttempts(attempts))
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn digest(passcode: &Passcode) -> PasscodeDigest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(passcode.as_bytes());

    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[async_trait]
impl VaultBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, _key: Option<&DatabaseKey>) -> Result<VaultHandle> {
        Ok(VaultHandle {
            id: self.handle_id,
            key: self.state().config.key.clone(),
        })
    }

    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_io(Operation::GetValue).await?;
        self.ensure_unlocked().await?;

        debug!("Reading '{}' from memory vault", key);
        Ok(self.state().values.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.simulate_io(Operation::SetValue).await?;
        self.ensure_unlocked().await?;

        debug!("Writing '{}' to memory vault", key);
        self.state().values.insert(key.to_string(), value);
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool> {
        self.simulate_io(Operation::IsEmpty).await?;
        Ok(self.state().values.is_empty())
    }

    async fn is_locked(&self) -> Result<bool> {
        self.simulate_io(Operation::IsLocked).await?;
        Ok(self.state().locked)
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.simulate_io(Operation::Clear).await?;

        let mut state = self.state();
        state.values.clear();
        state.locked = false;
        state.passcode = None;
        state.failed_attempts = 0;
        Ok(())
    }

    fn config(&self) -> VaultConfiguration {
        self.state().config.clone()
    }

    async fn update_config(&self, config: VaultConfiguration) -> Result<()> {
        self.config_updates.fetch_add(1, Ordering::SeqCst);
        self.simulate_io(Operation::UpdateConfig).await?;

        // A locked vault holding values only changes class after unlocking.
        let guarded = {
            let state = self.state();
            state.locked && !state.values.is_empty()
        };
        if guarded {
            self.unlock().await?;
        }

        let current_class = self.state().config.storage_class;
        let entering_custom_passcode = config.storage_class == StorageClass::CustomPasscode
            && current_class != StorageClass::CustomPasscode;

        let passcode = if entering_custom_passcode {
            let passcode = self
                .events
                .request_passcode(PasscodeRequest { is_set_request: true })
                .await?;
            Some(digest(&passcode))
        } else {
            None
        };

        let mut state = self.state();
        if entering_custom_passcode {
            state.passcode = passcode;
            state.failed_attempts = 0;
        }
        if !config.storage_class.is_lockable() {
            state.locked = false;
        }
        info!(
            "Memory vault configured: {} / {:?}",
            config.storage_class, config.device_security
        );
        state.config = config;
        Ok(())
    }

    async fn lock(&self) -> Result<()> {
        self.simulate_io(Operation::Lock).await?;
        self.lock_with_reason(LockReason::Explicit);
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        self.simulate_io(Operation::Unlock).await?;

        let (locked, storage_class) = {
            let state = self.state();
            (state.locked, state.config.storage_class)
        };
        if !locked {
            return Ok(());
        }

        match storage_class {
            StorageClass::CustomPasscode => self.unlock_with_passcode().await,
            StorageClass::DeviceSecurity => {
                if self.device_auth_allowed.load(Ordering::SeqCst) {
                    self.state().locked = false;
                    Ok(())
                } else {
                    Err(Error::PermissionDenied(
                        "Device authentication failed".to_string(),
                    ))
                }
            }
            StorageClass::SecureStorage | StorageClass::InMemory => {
                self.state().locked = false;
                Ok(())
            }
        }
    }

    fn on_lock(&self, listener: Arc<dyn LockListener>) {
        self.events.add_lock_listener(listener);
    }

    fn on_passcode_requested(&self, provider: Arc<dyn PasscodeProvider>) {
        self.events.set_passcode_provider(provider);
    }
}
