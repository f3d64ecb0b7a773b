//! Session vault for SessionVault.
//!
//! This module provides:
//! - The session manager that stores, caches and clears the authenticated session
//! - Unlock modes and their mapping onto backend configuration
//! - Biometric provisioning and unlock-mode autodetection
//! - The session lifecycle state machine
//!
//! # Architecture
//! The manager sits between the application and a vault backend. It owns the
//! in-memory session mirror and the current unlock mode, and reacts to lock
//! events reported by the backend.

pub mod cache;
pub mod config;
pub mod manager;
pub mod policy;
pub mod state;

pub use cache::{CacheWrite, SessionCache};
pub use config::{SessionVaultConfig, DEFAULT_BIOMETRIC_PROMPT_REASON, DEFAULT_SESSION_KEY};
pub use manager::{Navigator, SessionVault};
pub use policy::{provision, resolve, select_unlock_mode, UnlockMode, UnlockPolicy};
pub use state::{VaultEvent, VaultState};
