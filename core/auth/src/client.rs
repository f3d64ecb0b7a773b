//! Authentication service client.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use sessionvault_common::{Error, Result, Session, UserIdentity};

/// Demo authentication service.
pub const DEFAULT_BASE_URL: &str = "https://cs-demo-api.herokuapp.com";

/// Reply of the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default)]
    pub user: Option<UserIdentity>,
    #[serde(default)]
    pub token: Option<String>,
}

impl AuthResponse {
    /// A refused login.
    pub fn rejected() -> Self {
        Self {
            success: false,
            user: None,
            token: None,
        }
    }

    /// The session carried by a successful response.
    pub fn into_session(self) -> Option<Session> {
        match (self.success, self.user, self.token) {
            (true, Some(user), Some(token)) => Some(Session::new(user, token)),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

/// Remote authority that issues and revokes sessions.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Exchange credentials for a session.
    ///
    /// Rejected credentials are a successful call returning
    /// `success == false`, not an error.
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResponse>;

    /// Revoke `session` on the server.
    async fn logout(&self, session: Option<&Session>) -> Result<()>;
}

/// [`Authenticator`] speaking the JSON login API over HTTPS.
pub struct HttpAuthenticator {
    http: Client,
    base: Url,
}

impl HttpAuthenticator {
    /// Client for the service at `base`.
    pub fn new(base: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("SessionVault/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, base })
    }

    /// Client for [`DEFAULT_BASE_URL`].
    pub fn with_default_base() -> Result<Self> {
        let base = Url::parse(DEFAULT_BASE_URL)
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL: {}", e)))?;
        Self::new(base)
    }

    /// Absolute URL of `path` on the service.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint '{}': {}", path, e)))
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let url = self.endpoint("login")?;
        debug!("POST {}", url);

        let response = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(&Credentials { username, password })
            .send()
            .await
            .map_err(|e| Error::Network(format!("Login request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse login response: {}", e)))
        } else if status == StatusCode::UNAUTHORIZED {
            Ok(AuthResponse::rejected())
        } else {
            Err(Error::Network(format!("Login failed with status {}", status)))
        }
    }

    async fn logout(&self, session: Option<&Session>) -> Result<()> {
        let url = self.endpoint("logout")?;
        debug!("POST {}", url);

        let mut request = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(session) = session {
            request = request.bearer_auth(&session.token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Logout request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED {
            Err(Error::AuthenticationFailed(
                "Session already expired".to_string(),
            ))
        } else {
            Err(Error::Network(format!("Logout failed with status {}", status)))
        }
    }
}
