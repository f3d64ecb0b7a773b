//! Common error types for SessionVault.

use thiserror::Error;

/// Top-level error type for SessionVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The vault was used before `create` was called with a valid key.
    #[error("Vault not initialized: {0}")]
    VaultUninitialized(String),

    /// Biometric or device security is unavailable or was refused.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The underlying keystore could not be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend evicted the vault after repeated unlock failures.
    #[error("Too many failed unlock attempts ({0})")]
    TooManyFailedAttempts(u32),

    /// A supplied passcode did not match.
    #[error("Invalid passcode")]
    InvalidPasscode,

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Network request failed.
    #[error("Network error: {0}")]
    Network(String),

    /// The authentication service rejected the request.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
