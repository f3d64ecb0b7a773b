//! Session vault lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Observable state of a [`SessionVault`](crate::SessionVault).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VaultState {
    NoSession = 0,
    SessionCachedAndPersisted = 1,
    Locked = 2,
}

/// Inputs of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultEvent {
    /// `set_session` persisted a session.
    SessionStored,
    /// A backend read found a session.
    SessionRestored,
    /// A backend read found nothing.
    SessionAbsent,
    /// The vault was cleared.
    Cleared,
    /// The backend reported a lock transition.
    LockReported,
}

impl VaultState {
    /// The state after `event`.
    pub fn next(self, event: VaultEvent) -> VaultState {
        match (self, event) {
            (_, VaultEvent::SessionStored) | (_, VaultEvent::SessionRestored) => {
                VaultState::SessionCachedAndPersisted
            }
            (_, VaultEvent::SessionAbsent) | (_, VaultEvent::Cleared) => VaultState::NoSession,
            (VaultState::NoSession, VaultEvent::LockReported) => VaultState::NoSession,
            (_, VaultEvent::LockReported) => VaultState::Locked,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => VaultState::SessionCachedAndPersisted,
            2 => VaultState::Locked,
            _ => VaultState::NoSession,
        }
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VaultState::NoSession => "no session",
            VaultState::SessionCachedAndPersisted => "session cached",
            VaultState::Locked => "locked",
        };
        f.write_str(name)
    }
}

/// Lock-free cell holding a [`VaultState`].
///
/// The low byte is the state. The rest counts lock and clear events, so a
/// transition computed before one of them can be dropped.
pub(crate) struct StateCell(AtomicU64);

const STATE_MASK: u64 = 0xff;

impl StateCell {
    pub(crate) fn new(state: VaultState) -> Self {
        Self(AtomicU64::new(state as u64))
    }

    pub(crate) fn get(&self) -> VaultState {
        VaultState::from_u8((self.0.load(Ordering::SeqCst) & STATE_MASK) as u8)
    }

    /// Number of lock and clear events applied so far.
    pub(crate) fn generation(&self) -> u64 {
        self.0.load(Ordering::SeqCst) >> 8
    }

    /// Apply `event` atomically and return the new state.
    pub(crate) fn apply(&self, event: VaultEvent) -> VaultState {
        self.apply_if(event, |_| true).unwrap_or_else(|| self.get())
    }

    /// Apply `event` unless a lock or clear happened after `generation`.
    pub(crate) fn apply_since(&self, generation: u64, event: VaultEvent) -> Option<VaultState> {
        self.apply_if(event, |current| current == generation)
    }

    fn apply_if(&self, event: VaultEvent, accept: impl Fn(u64) -> bool) -> Option<VaultState> {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            let generation = current >> 8;
            if !accept(generation) {
                return None;
            }

            let next = VaultState::from_u8((current & STATE_MASK) as u8).next(event);
            let generation = match event {
                VaultEvent::LockReported | VaultEvent::Cleared => generation.wrapping_add(1),
                _ => generation,
            };
            let packed = (generation << 8) | next as u64;
            match self
                .0
                .compare_exchange(current, packed, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Some(next),
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use VaultEvent::*;
        use VaultState::*;

        assert_eq!(NoSession.next(SessionStored), SessionCachedAndPersisted);
        assert_eq!(Locked.next(SessionRestored), SessionCachedAndPersisted);
        assert_eq!(SessionCachedAndPersisted.next(LockReported), Locked);
        assert_eq!(NoSession.next(LockReported), NoSession);
        assert_eq!(Locked.next(Cleared), NoSession);
        assert_eq!(SessionCachedAndPersisted.next(SessionAbsent), NoSession);
    }

    #[test]
    fn test_cell_applies_events() {
        let cell = StateCell::new(VaultState::NoSession);
        assert_eq!(cell.apply(VaultEvent::SessionStored), VaultState::SessionCachedAndPersisted);
        assert_eq!(cell.apply(VaultEvent::LockReported), VaultState::Locked);
        assert_eq!(cell.get(), VaultState::Locked);
    }

    #[test]
    fn test_stale_transition_is_dropped() {
        let cell = StateCell::new(VaultState::SessionCachedAndPersisted);
        let before = cell.generation();

        cell.apply(VaultEvent::LockReported);

        assert_eq!(cell.apply_since(before, VaultEvent::SessionRestored), None);
        assert_eq!(cell.get(), VaultState::Locked);

        let after = cell.generation();
        assert_eq!(
            cell.apply_since(after, VaultEvent::SessionRestored),
            Some(VaultState::SessionCachedAndPersisted)
        );
    }

    #[test]
    fn test_generation_counts_locks_and_clears() {
        let cell = StateCell::new(VaultState::NoSession);
        cell.apply(VaultEvent::SessionStored);
        assert_eq!(cell.generation(), 0);

        cell.apply(VaultEvent::LockReported);
        cell.apply(VaultEvent::Cleared);
        assert_eq!(cell.generation(), 2);
        assert_eq!(cell.get(), VaultState::NoSession);
    }
}
