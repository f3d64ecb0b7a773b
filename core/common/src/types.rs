//! Common types used throughout SessionVault.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Vault namespace used when none is configured.
pub const DEFAULT_VAULT_KEY: &str = "io.ionic.csdemosecurestorage";

/// Name of a vault namespace on the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultKey(String);

impl VaultKey {
    /// Create a new VaultKey from a string.
    ///
    /// # Errors
    /// - Returns error if the key is empty
    /// - Returns error if the key contains a path separator
    pub fn new(key: impl Into<String>) -> crate::Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(crate::Error::InvalidInput(
                "VaultKey cannot be empty".to_string(),
            ));
        }
        if key.contains('/') || key.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "VaultKey cannot contain separators".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VaultKey {
    fn default() -> Self {
        Self(DEFAULT_VAULT_KEY.to_string())
    }
}

impl TryFrom<String> for VaultKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<VaultKey> for String {
    fn from(key: VaultKey) -> Self {
        key.0
    }
}

impl fmt::Display for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// An authenticated session: the user plus the bearer token issued for them.
///
/// The vault treats a session as an opaque serializable value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: UserIdentity,
    pub token: String,
}

impl Session {
    /// Create a session for a user.
    pub fn new(user: UserIdentity, token: impl Into<String>) -> Self {
        Self {
            user,
            token: token.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Application-supplied custom passcode. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passcode(String);

impl Passcode {
    /// Wrap a passcode.
    ///
    /// # Errors
    /// - Returns error if the passcode is empty
    pub fn new(passcode: impl Into<String>) -> crate::Result<Self> {
        let passcode = passcode.into();
        if passcode.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Passcode cannot be empty".to_string(),
            ));
        }
        Ok(Self(passcode))
    }

    /// Get the passcode bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Passcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passcode([REDACTED])")
    }
}
