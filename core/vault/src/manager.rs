//! Session vault manager.
//!
//! Keeps the authenticated session in a vault backend, mirrors it in memory
//! and applies the configured unlock mode. Lock events reported by the
//! backend invalidate the mirror and send the user back to login.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::SessionCache;
use crate::config::SessionVaultConfig;
use crate::policy::{provision, resolve, select_unlock_mode, UnlockMode};
use crate::state::{StateCell, VaultEvent, VaultState};
use sessionvault_common::{Error, Passcode, Result, Session};
use sessionvault_storage::{
    DeviceCapabilities, LockEvent, LockListener, PasscodeProvider, PasscodeRequest, StorageClass,
    VaultBackend,
};

/// Routes the user to the login screen.
///
/// Fire-and-forget: called from lock listeners, so it must not block.
pub trait Navigator: Send + Sync {
    fn navigate_to_login(&self);
}

impl<F> Navigator for F
where
    F: Fn() + Send + Sync,
{
    fn navigate_to_login(&self) {
        self()
    }
}

struct Inner {
    backend: Arc<dyn VaultBackend>,
    device: Arc<dyn DeviceCapabilities>,
    navigator: Arc<dyn Navigator>,
    config: SessionVaultConfig,
    cache: SessionCache<Session>,
    state: StateCell,
    /// Serializes mutations. Reads that reach the backend take the read side.
    mode: RwLock<UnlockMode>,
    passcode_provider: Mutex<Option<Arc<dyn PasscodeProvider>>>,
}

impl Inner {
    fn handle_lock(&self, event: &LockEvent) {
        self.cache.invalidate();
        if event.values_discarded {
            warn!("Vault locked and emptied ({:?})", event.reason);
            self.state.apply(VaultEvent::Cleared);
        } else {
            warn!("Vault locked ({:?})", event.reason);
            self.state.apply(VaultEvent::LockReported);
        }
        self.navigator.navigate_to_login();
    }
}

/// Lock listener registered on the backend.
struct LockHandler {
    inner: Weak<Inner>,
}

impl LockListener for LockHandler {
    fn on_lock(&self, event: &LockEvent) {
        match self.inner.upgrade() {
            Some(inner) => inner.handle_lock(event),
            None => debug!("Lock event after session vault was dropped"),
        }
    }
}

/// Forwards backend passcode requests to the application's provider.
struct PasscodeDelegate {
    inner: Weak<Inner>,
}

#[async_trait]
impl PasscodeProvider for PasscodeDelegate {
    async fn provide_passcode(&self, request: PasscodeRequest) -> Result<Passcode> {
        let provider = self.inner.upgrade().and_then(|inner| {
            inner
                .passcode_provider
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        });

        match provider {
            Some(provider) => provider.provide_passcode(request).await,
            None => Err(Error::PermissionDenied(
                "No passcode provider configured".to_string(),
            )),
        }
    }
}

/// Owner of the authenticated session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionVault {
    inner: Arc<Inner>,
}

impl SessionVault {
    /// Create a manager over `backend`.
    ///
    /// Registers the lock listener and the passcode delegate on the backend.
    /// The current unlock mode is recovered from the backend configuration.
    pub fn new(
        backend: Arc<dyn VaultBackend>,
        device: Arc<dyn DeviceCapabilities>,
        navigator: Arc<dyn Navigator>,
        config: SessionVaultConfig,
    ) -> Self {
        let mode = UnlockMode::from_configuration(&backend.config());
        let inner = Arc::new(Inner {
            backend,
            device,
            navigator,
            config,
            cache: SessionCache::new(),
            state: StateCell::new(VaultState::NoSession),
            mode: RwLock::new(mode),
            passcode_provider: Mutex::new(None),
        });

        inner.backend.on_lock(Arc::new(LockHandler {
            inner: Arc::downgrade(&inner),
        }));
        inner.backend.on_passcode_requested(Arc::new(PasscodeDelegate {
            inner: Arc::downgrade(&inner),
        }));

        debug!("Session vault created over '{}' backend", inner.backend.name());
        Self { inner }
    }

    /// Set the provider asked for custom passcodes in `SessionPIN` mode.
    pub fn set_passcode_provider(&self, provider: Arc<dyn PasscodeProvider>) {
        *self
            .inner
            .passcode_provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }

    /// Store a freshly authenticated session.
    ///
    /// The in-memory copy is visible to readers immediately. If persisting
    /// fails, the previous copy is restored and the error returned.
    pub async fn set_session(&self, session: Session) -> Result<()> {
        let _mode = self.inner.mode.write().await;
        let value = serde_json::to_value(&session)?;

        let generation = self.inner.state.generation();
        let write = self.inner.cache.set(session);
        if let Err(e) = self
            .inner
            .backend
            .set_value(&self.inner.config.session_key, value)
            .await
        {
            self.inner.cache.restore(write);
            return Err(e);
        }

        if self
            .inner
            .state
            .apply_since(generation, VaultEvent::SessionStored)
            .is_none()
        {
            debug!("Vault locked while the session was being stored");
        }
        info!("Session stored");
        Ok(())
    }

    /// The current session, if any.
    ///
    /// Served from memory when possible. A miss reads the backend once, which
    /// may unlock the vault first.
    pub async fn get_session(&self) -> Result<Option<Session>> {
        let inner = &self.inner;
        let generation = inner.state.generation();
        let session = inner
            .cache
            .get(|| async {
                let _mode = inner.mode.read().await;
                let value = inner.backend.get_value(&inner.config.session_key).await?;
                let session = value.map(serde_json::from_value::<Session>).transpose()?;
                Ok(session)
            })
            .await?;

        let event = if session.is_some() {
            VaultEvent::SessionRestored
        } else {
            VaultEvent::SessionAbsent
        };
        inner.state.apply_since(generation, event);
        Ok(session)
    }

    /// Forget the session everywhere and return to login.
    ///
    /// Resets the unlock mode to `NeverLock` before clearing the backend. A
    /// locked vault is emptied first, so the reset needs no credential.
    pub async fn clear_session(&self) -> Result<()> {
        let mut mode = self.inner.mode.write().await;
        self.inner.cache.invalidate();

        if self.inner.backend.is_locked().await? {
            debug!("Discarding locked session before resetting unlock mode");
            self.inner.backend.clear().await?;
        }
        self.apply_unlock_mode(&mut mode, UnlockMode::NeverLock).await?;
        self.inner.backend.clear().await?;
        self.inner.state.apply(VaultEvent::Cleared);
        drop(mode);

        info!("Session cleared");
        self.inner.navigator.navigate_to_login();
        Ok(())
    }

    /// Whether the platform offers any lock surface.
    pub fn can_use_locking(&self) -> bool {
        self.inner.device.is_native_platform()
    }

    /// Whether a locked session is waiting to be unlocked.
    pub async fn can_unlock(&self) -> Result<bool> {
        if !self.inner.device.is_native_platform() {
            return Ok(false);
        }

        let _mode = self.inner.mode.read().await;
        if self.inner.backend.is_empty().await? {
            return Ok(false);
        }
        self.inner.backend.is_locked().await
    }

    /// Switch the vault to `mode`.
    ///
    /// Modes backed by device security provision biometric permission first.
    /// Leaving a locked vault's class requires unlocking it. On failure the
    /// previous mode stays in effect.
    pub async fn set_unlock_mode(&self, mode: UnlockMode) -> Result<()> {
        let mut current = self.inner.mode.write().await;
        self.apply_unlock_mode(&mut current, mode).await
    }

    /// Pick the strongest mode the device supports and apply it.
    pub async fn initialize_unlock_mode(&self) -> Result<UnlockMode> {
        let mut current = self.inner.mode.write().await;
        let mode = select_unlock_mode(self.inner.device.as_ref()).await?;
        self.apply_unlock_mode(&mut current, mode).await?;
        Ok(mode)
    }

    async fn apply_unlock_mode(&self, current: &mut UnlockMode, mode: UnlockMode) -> Result<()> {
        let policy = resolve(mode);
        if policy.requires_provisioning {
            provision(
                self.inner.device.as_ref(),
                &self.inner.config.biometric_prompt_reason,
            )
            .await?;
        }

        let config = policy.apply_to(&self.inner.backend.config());
        self.inner.backend.update_config(config).await?;

        *current = mode;
        info!("Unlock mode set to {}", mode);
        Ok(())
    }

    /// The unlock mode currently in effect.
    pub async fn unlock_mode(&self) -> UnlockMode {
        *self.inner.mode.read().await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VaultState {
        self.inner.state.get()
    }

    /// Storage class of the vault, or `None` if it holds nothing.
    pub async fn vault_storage_class(&self) -> Result<Option<StorageClass>> {
        let _mode = self.inner.mode.read().await;
        if self.inner.backend.is_empty().await? {
            return Ok(None);
        }
        Ok(Some(self.inner.backend.config().storage_class))
    }

    /// Lock the vault now.
    ///
    /// The resulting lock event is handled like any other: the session is
    /// dropped from memory and the user is sent to login.
    pub async fn lock(&self) -> Result<()> {
        let _mode = self.inner.mode.write().await;
        self.inner.backend.lock().await
    }

    /// Unlock the vault and read the session back.
    pub async fn unlock(&self) -> Result<Option<Session>> {
        {
            let _mode = self.inner.mode.read().await;
            self.inner.backend.unlock().await?;
        }
        self.get_session().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use proptest::prelude::*;
    use sessionvault_common::UserIdentity;
    use sessionvault_storage::{
        BiometricPermission, DeviceSecurityClass, MemoryBackend, Operation, SimulatedDevice,
        VaultConfiguration,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingNavigator {
        visits: AtomicUsize,
    }

    impl RecordingNavigator {
        fn visits(&self) -> usize {
            self.visits.load(Ordering::SeqCst)
        }
    }

    impl Navigator for RecordingNavigator {
        fn navigate_to_login(&self) {
            self.visits.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedPasscodes {
        answers: Vec<&'static str>,
        asked: AtomicUsize,
    }

    impl ScriptedPasscodes {
        fn new(answers: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                answers,
                asked: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PasscodeProvider for ScriptedPasscodes {
        async fn provide_passcode(&self, _request: PasscodeRequest) -> Result<Passcode> {
            let index = self.asked.fetch_add(1, Ordering::SeqCst);
            Passcode::new(self.answers[index.min(self.answers.len() - 1)])
        }
    }

    struct Fixture {
        vault: SessionVault,
        backend: Arc<MemoryBackend>,
        device: Arc<SimulatedDevice>,
        navigator: Arc<RecordingNavigator>,
    }

    fn fixture_with(device: SimulatedDevice) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let device = Arc::new(device);
        let navigator = Arc::new(RecordingNavigator::default());
        let vault = SessionVault::new(
            backend.clone(),
            device.clone(),
            navigator.clone(),
            SessionVaultConfig::default(),
        );
        Fixture {
            vault,
            backend,
            device,
            navigator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SimulatedDevice::native())
    }

    fn test_session() -> Session {
        Session::new(
            UserIdentity {
                id: 314159,
                first_name: "Testy".to_string(),
                last_name: "McTest".to_string(),
                email: "test@test.com".to_string(),
            },
            "123456789",
        )
    }

    #[tokio::test]
    async fn test_set_then_get_without_backend_read() {
        let f = fixture();
        f.vault.set_session(test_session()).await.unwrap();

        assert_eq!(f.vault.get_session().await.unwrap(), Some(test_session()));
        assert_eq!(f.backend.reads(), 0);
        assert_eq!(f.backend.writes(), 1);
        assert_eq!(f.vault.state(), VaultState::SessionCachedAndPersisted);
    }

    #[tokio::test]
    async fn test_empty_vault_reads_once() {
        let f = fixture();

        assert_eq!(f.vault.get_session().await.unwrap(), None);
        assert_eq!(f.vault.get_session().await.unwrap(), None);

        assert_eq!(f.backend.reads(), 1);
        assert_eq!(f.vault.state(), VaultState::NoSession);
    }

    #[tokio::test]
    async fn test_session_recovered_from_backend() {
        let f = fixture();
        let stored = serde_json::to_value(test_session()).unwrap();
        f.backend.set_value("session", stored).await.unwrap();

        assert_eq!(f.vault.get_session().await.unwrap(), Some(test_session()));
        assert_eq!(f.vault.state(), VaultState::SessionCachedAndPersisted);
    }

    #[tokio::test]
    async fn test_concurrent_reads_coalesce() {
        let f = fixture();
        let stored = serde_json::to_value(test_session()).unwrap();
        f.backend.set_value("session", stored).await.unwrap();
        f.backend.set_latency(Duration::from_millis(20));

        let readers = (0..10).map(|_| f.vault.get_session());
        let results = join_all(readers).await;

        for result in results {
            assert_eq!(result.unwrap(), Some(test_session()));
        }
        assert_eq!(f.backend.reads(), 1);
    }

    #[tokio::test]
    async fn test_clear_session() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();

        f.vault.clear_session().await.unwrap();

        assert_eq!(f.vault.get_session().await.unwrap(), None);
        assert_eq!(f.vault.unlock_mode().await, UnlockMode::NeverLock);
        assert_eq!(f.backend.config().storage_class, StorageClass::SecureStorage);
        assert_eq!(f.backend.clears(), 1);
        assert_eq!(f.navigator.visits(), 1);
        assert_eq!(f.vault.state(), VaultState::NoSession);
    }

    #[tokio::test]
    async fn test_can_unlock_truth_table() {
        let web = fixture_with(SimulatedDevice::web());
        web.vault.set_session(test_session()).await.unwrap();
        assert!(!web.vault.can_use_locking());
        assert!(!web.vault.can_unlock().await.unwrap());

        let f = fixture();
        assert!(f.vault.can_use_locking());
        assert!(!f.vault.can_unlock().await.unwrap());

        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();
        assert!(!f.vault.can_unlock().await.unwrap());

        f.vault.lock().await.unwrap();
        assert!(f.vault.can_unlock().await.unwrap());

        f.device.set_native(false);
        assert!(!f.vault.can_unlock().await.unwrap());
    }

    #[tokio::test]
    async fn test_device_mode_provisions_once_when_undecided() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();

        assert_eq!(f.device.prompt_count(), 1);
        assert_eq!(
            f.device.last_prompt_reason().as_deref(),
            Some("Authenticate to continue")
        );
        let config = f.backend.config();
        assert_eq!(config.storage_class, StorageClass::DeviceSecurity);
        assert_eq!(config.device_security, DeviceSecurityClass::Both);
        assert_eq!(config.auto_lock_delay_ms, 5000);

        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        assert_eq!(f.device.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_decided_permission_is_not_prompted() {
        let modes = [
            (UnlockMode::Device, DeviceSecurityClass::Both),
            (UnlockMode::SystemPin, DeviceSecurityClass::SystemPasscode),
        ];
        for permission in [BiometricPermission::Granted, BiometricPermission::Denied] {
            for (mode, device_security) in modes {
                let f = fixture_with(SimulatedDevice::native().with_permission(permission));
                f.vault.set_unlock_mode(mode).await.unwrap();
                assert_eq!(f.device.prompt_count(), 0);
                assert_eq!(f.backend.config().device_security, device_security);
                assert_eq!(f.vault.unlock_mode().await, mode);
            }
        }
    }

    #[tokio::test]
    async fn test_unlock_mode_preserves_other_configuration() {
        let mut config = VaultConfiguration::default();
        config.auto_lock_delay_ms = 60_000;
        config.max_failed_passcode_attempts = 5;
        let backend = Arc::new(MemoryBackend::with_config(config));
        let vault = SessionVault::new(
            backend.clone(),
            Arc::new(SimulatedDevice::native()),
            Arc::new(|| {}),
            SessionVaultConfig::default(),
        );

        vault.set_unlock_mode(UnlockMode::ForceLogin).await.unwrap();

        let updated = backend.config();
        assert_eq!(updated.storage_class, StorageClass::InMemory);
        assert_eq!(updated.auto_lock_delay_ms, 60_000);
        assert_eq!(updated.max_failed_passcode_attempts, 5);
    }

    #[tokio::test]
    async fn test_lock_event_forces_reread() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();

        f.vault.lock().await.unwrap();
        assert_eq!(f.vault.state(), VaultState::Locked);
        assert_eq!(f.navigator.visits(), 1);

        assert_eq!(f.vault.get_session().await.unwrap(), Some(test_session()));
        assert_eq!(f.backend.reads(), 1);
        assert_eq!(f.vault.state(), VaultState::SessionCachedAndPersisted);
    }

    #[tokio::test]
    async fn test_background_timeout_locks_manager() {
        let mut config = VaultConfiguration::default();
        config.auto_lock_delay_ms = 0;
        let backend = Arc::new(MemoryBackend::with_config(config));
        let navigator = Arc::new(RecordingNavigator::default());
        let vault = SessionVault::new(
            backend.clone(),
            Arc::new(SimulatedDevice::native()),
            navigator.clone(),
            SessionVaultConfig::default(),
        );
        vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        vault.set_session(test_session()).await.unwrap();

        backend.enter_background();
        backend.enter_foreground();

        assert_eq!(vault.state(), VaultState::Locked);
        assert_eq!(navigator.visits(), 1);
        assert!(vault.can_unlock().await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_during_store_is_not_overwritten() {
        let mut config = VaultConfiguration::default();
        config.auto_lock_delay_ms = 0;
        let backend = Arc::new(MemoryBackend::with_config(config));
        let vault = SessionVault::new(
            backend.clone(),
            Arc::new(SimulatedDevice::native()),
            Arc::new(|| {}),
            SessionVaultConfig::default(),
        );
        vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        vault.set_session(test_session()).await.unwrap();
        backend.set_latency(Duration::from_millis(50));

        let renewed = Session::new(test_session().user, "987654321");
        let (stored, _) = tokio::join!(vault.set_session(renewed.clone()), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            backend.enter_background();
            backend.enter_foreground();
        });
        stored.unwrap();

        assert_eq!(vault.state(), VaultState::Locked);
        assert_eq!(vault.get_session().await.unwrap(), Some(renewed));
        assert_eq!(vault.state(), VaultState::SessionCachedAndPersisted);
    }

    #[tokio::test]
    async fn test_force_login_lock_discards_session() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::ForceLogin).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();

        f.vault.lock().await.unwrap();

        assert_eq!(f.vault.state(), VaultState::NoSession);
        assert!(!f.vault.can_unlock().await.unwrap());
        assert_eq!(f.vault.get_session().await.unwrap(), None);
        assert_eq!(f.navigator.visits(), 1);
    }

    #[tokio::test]
    async fn test_never_lock_ignores_lock() {
        let f = fixture();
        f.vault.set_session(test_session()).await.unwrap();

        f.vault.lock().await.unwrap();

        assert_eq!(f.vault.state(), VaultState::SessionCachedAndPersisted);
        assert_eq!(f.navigator.visits(), 0);
        assert_eq!(f.backend.reads(), 0);
    }

    #[tokio::test]
    async fn test_unlock_reads_session_back() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::SystemPin).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();
        f.vault.lock().await.unwrap();

        assert_eq!(f.vault.unlock().await.unwrap(), Some(test_session()));
        assert!(!f.vault.can_unlock().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_device_unlock_propagates() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();
        f.vault.lock().await.unwrap();
        f.backend.set_device_auth_allowed(false);

        assert!(matches!(
            f.vault.get_session().await,
            Err(Error::PermissionDenied(_))
        ));
        assert_eq!(f.vault.state(), VaultState::Locked);
    }

    #[tokio::test]
    async fn test_locked_vault_refuses_mode_change_without_authentication() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();
        f.vault.lock().await.unwrap();
        f.backend.set_device_auth_allowed(false);

        for mode in [UnlockMode::NeverLock, UnlockMode::ForceLogin] {
            assert!(matches!(
                f.vault.set_unlock_mode(mode).await,
                Err(Error::PermissionDenied(_))
            ));
        }

        assert_eq!(f.vault.unlock_mode().await, UnlockMode::Device);
        assert_eq!(f.backend.config().storage_class, StorageClass::DeviceSecurity);
        assert!(matches!(
            f.vault.get_session().await,
            Err(Error::PermissionDenied(_))
        ));
        assert_eq!(f.vault.state(), VaultState::Locked);
    }

    #[tokio::test]
    async fn test_mode_change_on_locked_vault_unlocks_first() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();
        f.vault.lock().await.unwrap();

        f.vault.set_unlock_mode(UnlockMode::NeverLock).await.unwrap();

        assert!(!f.vault.can_unlock().await.unwrap());
        assert_eq!(f.vault.get_session().await.unwrap(), Some(test_session()));
    }

    #[tokio::test]
    async fn test_clear_locked_session_without_authentication() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();
        f.vault.lock().await.unwrap();
        f.backend.set_device_auth_allowed(false);

        f.vault.clear_session().await.unwrap();

        assert_eq!(f.vault.unlock_mode().await, UnlockMode::NeverLock);
        assert_eq!(f.vault.state(), VaultState::NoSession);
        assert_eq!(f.vault.get_session().await.unwrap(), None);
        assert!(f.backend.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_set_session_keeps_previous() {
        let f = fixture();
        let first = test_session();
        f.vault.set_session(first.clone()).await.unwrap();

        f.backend.fail_next(
            Operation::SetValue,
            Error::BackendUnavailable("keystore offline".to_string()),
        );
        let second = Session::new(first.user.clone(), "987654321");
        let result = f.vault.set_session(second).await;

        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        assert_eq!(f.vault.get_session().await.unwrap(), Some(first));
        assert_eq!(f.backend.reads(), 0);
    }

    #[tokio::test]
    async fn test_failed_first_set_session_leaves_no_session() {
        let f = fixture();
        f.backend.fail_next(
            Operation::SetValue,
            Error::BackendUnavailable("keystore offline".to_string()),
        );

        assert!(f.vault.set_session(test_session()).await.is_err());

        assert_eq!(f.vault.state(), VaultState::NoSession);
        assert_eq!(f.vault.get_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_set_unlock_mode_keeps_mode() {
        let f = fixture();
        f.backend.fail_next(
            Operation::UpdateConfig,
            Error::BackendUnavailable("keystore offline".to_string()),
        );

        let result = f.vault.set_unlock_mode(UnlockMode::ForceLogin).await;

        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        assert_eq!(f.vault.unlock_mode().await, UnlockMode::NeverLock);
        assert_eq!(f.backend.config().storage_class, StorageClass::SecureStorage);
    }

    #[tokio::test]
    async fn test_session_pin_without_provider_is_denied() {
        let f = fixture();

        let result = f.vault.set_unlock_mode(UnlockMode::SessionPin).await;

        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert_eq!(f.vault.unlock_mode().await, UnlockMode::NeverLock);
    }

    #[tokio::test]
    async fn test_session_pin_round_trip() {
        let f = fixture();
        let passcodes = ScriptedPasscodes::new(vec!["2468"]);
        f.vault.set_passcode_provider(passcodes.clone());
        f.vault.set_unlock_mode(UnlockMode::SessionPin).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();

        f.vault.lock().await.unwrap();
        assert_eq!(f.vault.get_session().await.unwrap(), Some(test_session()));
        assert_eq!(passcodes.asked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_too_many_wrong_passcodes_clears_vault() {
        let f = fixture();
        f.vault
            .set_passcode_provider(ScriptedPasscodes::new(vec!["2468", "0000"]));
        f.vault.set_unlock_mode(UnlockMode::SessionPin).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();
        f.vault.lock().await.unwrap();

        assert!(matches!(
            f.vault.get_session().await,
            Err(Error::InvalidPasscode)
        ));
        assert!(matches!(
            f.vault.get_session().await,
            Err(Error::TooManyFailedAttempts(2))
        ));

        assert_eq!(f.vault.state(), VaultState::NoSession);
        assert_eq!(f.navigator.visits(), 2);
        assert!(f.backend.is_empty().await.unwrap());
        assert!(!f.vault.can_unlock().await.unwrap());
    }

    #[tokio::test]
    async fn test_initialize_unlock_mode() {
        let cases = [
            (SimulatedDevice::native(), UnlockMode::Device),
            (SimulatedDevice::native().with_biometrics(false), UnlockMode::SystemPin),
            (SimulatedDevice::native().with_system_passcode(false), UnlockMode::NeverLock),
            (SimulatedDevice::web(), UnlockMode::NeverLock),
        ];

        for (device, expected) in cases {
            let f = fixture_with(device);
            assert_eq!(f.vault.initialize_unlock_mode().await.unwrap(), expected);
            assert_eq!(f.vault.unlock_mode().await, expected);
            assert_eq!(
                UnlockMode::from_configuration(&f.backend.config()),
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_mode_recovered_from_backend() {
        let config = VaultConfiguration::default()
            .with_classes(StorageClass::CustomPasscode, DeviceSecurityClass::None);
        let vault = SessionVault::new(
            Arc::new(MemoryBackend::with_config(config)),
            Arc::new(SimulatedDevice::native()),
            Arc::new(|| {}),
            SessionVaultConfig::default(),
        );
        assert_eq!(vault.unlock_mode().await, UnlockMode::SessionPin);
    }

    #[tokio::test]
    async fn test_vault_storage_class() {
        let f = fixture();
        assert_eq!(f.vault.vault_storage_class().await.unwrap(), None);

        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        assert_eq!(f.vault.vault_storage_class().await.unwrap(), None);

        f.vault.set_session(test_session()).await.unwrap();
        assert_eq!(
            f.vault.vault_storage_class().await.unwrap(),
            Some(StorageClass::DeviceSecurity)
        );
    }

    #[tokio::test]
    async fn test_dropped_manager_ignores_lock_events() {
        let f = fixture();
        f.vault.set_unlock_mode(UnlockMode::Device).await.unwrap();
        f.vault.set_session(test_session()).await.unwrap();
        let backend = f.backend.clone();
        let navigator = f.navigator.clone();
        drop(f);

        backend.lock().await.unwrap();

        assert!(backend.is_locked().await.unwrap());
        assert_eq!(navigator.visits(), 0);
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let a = fixture();
        let b = fixture();
        a.vault.set_session(test_session()).await.unwrap();

        assert_eq!(b.vault.get_session().await.unwrap(), None);
        assert_eq!(a.vault.get_session().await.unwrap(), Some(test_session()));
    }

    #[tokio::test]
    async fn test_login_logout_scenario() {
        let f = fixture();
        f.vault.set_session(test_session()).await.unwrap();

        assert_eq!(f.backend.writes(), 1);
        assert_eq!(
            f.backend.stored_value("session"),
            Some(serde_json::json!({
                "user": {
                    "id": 314159,
                    "firstName": "Testy",
                    "lastName": "McTest",
                    "email": "test@test.com"
                },
                "token": "123456789"
            }))
        );
        assert_eq!(f.vault.get_session().await.unwrap(), Some(test_session()));

        f.vault.clear_session().await.unwrap();

        assert_eq!(f.vault.get_session().await.unwrap(), None);
        assert!(!f.vault.can_unlock().await.unwrap());
    }

    fn arb_session() -> impl Strategy<Value = Session> {
        (any::<i64>(), "[A-Za-z]{1,12}", "[A-Za-z]{1,12}", "[a-z]{1,8}@[a-z]{1,8}\\.com", "[A-Za-z0-9]{1,40}")
            .prop_map(|(id, first_name, last_name, email, token)| {
                Session::new(
                    UserIdentity {
                        id,
                        first_name,
                        last_name,
                        email,
                    },
                    token,
                )
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_cache_matches_backend(session in arb_session()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let f = fixture();
                f.vault.set_session(session.clone()).await.unwrap();

                let cached = f.vault.get_session().await.unwrap();
                let stored: Session =
                    serde_json::from_value(f.backend.stored_value("session").unwrap()).unwrap();

                assert_eq!(cached, Some(session.clone()));
                assert_eq!(stored, session);

                f.vault.lock().await.unwrap();
                let reread = SessionVault::new(
                    f.backend.clone(),
                    f.device.clone(),
                    Arc::new(|| {}),
                    SessionVaultConfig::default(),
                )
                .get_session()
                .await
                .unwrap();
                assert_eq!(reread, Some(session));
            });
        }
    }
}
