//! Session vault configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use sessionvault_common::{Error, Result};
use sessionvault_storage::VaultConfiguration;

/// Key under which the session is persisted in the vault namespace.
pub const DEFAULT_SESSION_KEY: &str = "session";

/// Justification shown with the biometric permission prompt.
pub const DEFAULT_BIOMETRIC_PROMPT_REASON: &str = "Authenticate to continue";

/// Settings of a [`SessionVault`](crate::SessionVault).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionVaultConfig {
    /// Initial backend configuration, including the vault namespace.
    pub vault: VaultConfiguration,
    /// Key the session value is stored under.
    pub session_key: String,
    /// Localized justification for biometric provisioning.
    pub biometric_prompt_reason: String,
}

impl SessionVaultConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// - Malformed JSON
    /// - Empty session key
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.session_key.is_empty() {
            return Err(Error::InvalidInput("Session key cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for SessionVaultConfig {
    fn default() -> Self {
        Self {
            vault: VaultConfiguration::default(),
            session_key: DEFAULT_SESSION_KEY.to_string(),
            biometric_prompt_reason: DEFAULT_BIOMETRIC_PROMPT_REASON.to_string(),
        }
    }
}
