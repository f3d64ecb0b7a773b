//! Vault backend abstraction for SessionVault.
//!
//! This module provides the capability interface the session vault manager
//! consumes (an encrypted, access-controlled key-value store per device),
//! the device capability interface used for biometric provisioning, and two
//! backends:
//! - [`MemoryBackend`]: in-process store that simulates native lock
//!   semantics, custom passcodes and failed-attempt eviction
//! - [`LocalBackend`]: encrypted file store for platforms without a native
//!   secure enclave
//!
//! # Design Principles
//! - Policy isolation: backends never decide unlock modes, they only apply
//!   the configuration they are given
//! - Async operations: all I/O and user interaction is async
//! - Unified error semantics: consistent error types across backends

pub mod backend;
pub mod config;
pub mod device;
pub mod local;
pub mod memory;

pub use backend::{
    LockEvent, LockListener, LockReason, PasscodeProvider, PasscodeRequest, VaultBackend,
    VaultEvents, VaultHandle,
};
pub use config::{DeviceSecurityClass, StorageClass, VaultConfiguration};
pub use device::{BiometricPermission, DeviceCapabilities, HeadlessDevice, SimulatedDevice};
pub use local::LocalBackend;
pub use memory::{MemoryBackend, Operation};
