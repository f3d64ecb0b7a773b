//! Login and logout flows over the session vault.

use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::Authenticator;
use sessionvault_common::{Error, Result};
use sessionvault_vault::SessionVault;

/// Application authentication flows.
pub struct AuthService {
    vault: SessionVault,
    authenticator: Arc<dyn Authenticator>,
}

impl AuthService {
    pub fn new(vault: SessionVault, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            vault,
            authenticator,
        }
    }

    /// The session vault this service writes to.
    pub fn vault(&self) -> &SessionVault {
        &self.vault
    }

    /// Log in and store the issued session.
    ///
    /// Returns false when the service rejects the credentials. On success
    /// the strongest unlock mode the device supports is applied. If that
    /// fails the session stays stored under the mode already in effect.
    pub async fn login(&self, email: &str, password: &str) -> Result<bool> {
        let response = self.authenticator.authenticate(email, password).await?;
        if !response.success {
            info!("Login rejected");
            return Ok(false);
        }

        let session = response.into_session().ok_or_else(|| {
            Error::AuthenticationFailed("Login response carried no session".to_string())
        })?;
        self.vault.set_session(session).await?;

        match self.vault.initialize_unlock_mode().await {
            Ok(mode) => info!("Logged in, unlock mode {}", mode),
            Err(e) => warn!(
                "Logged in, keeping unlock mode {}: {}",
                self.vault.unlock_mode().await,
                e
            ),
        }
        Ok(true)
    }

    /// Log out on the server, then forget the session locally.
    ///
    /// The local session is cleared even if the server call fails.
    pub async fn logout(&self) -> Result<()> {
        let session = match self.vault.get_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Could not read session for logout: {}", e);
                None
            }
        };

        if let Err(e) = self.authenticator.logout(session.as_ref()).await {
            warn!("Server logout failed: {}", e);
        }

        self.vault.clear_session().await
    }

    /// `Authorization` header value for the current session.
    pub async fn authorization_header(&self) -> Result<Option<String>> {
        let session = self.vault.get_session().await?;
        Ok(session.map(|s| format!("Bearer {}", s.token)))
    }

    /// React to the status of an authenticated API response.
    ///
    /// A 401 means the server no longer honours the session: it is cleared
    /// and the user sent back to login. Returns whether that happened.
    pub async fn handle_response_status(&self, status: StatusCode) -> Result<bool> {
        if status != StatusCode::UNAUTHORIZED {
            return Ok(false);
        }

        warn!("Server rejected the session token");
        self.vault.clear_session().await?;
        Ok(true)
    }
}
