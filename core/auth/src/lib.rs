//! Authentication flows for SessionVault.
//!
//! Talks to the remote login service and keeps the resulting session in a
//! [`SessionVault`](sessionvault_vault::SessionVault).

pub mod client;
pub mod service;

pub use client::{AuthResponse, Authenticator, HttpAuthenticator, DEFAULT_BASE_URL};
pub use service::AuthService;
