//! Common utilities and types shared across SessionVault modules.
//!
//! This module provides the error taxonomy used by every layer and the
//! domain types that flow between the authentication collaborator, the
//! session vault manager and the vault backends.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Passcode, Session, UserIdentity, VaultKey, DEFAULT_VAULT_KEY};
