//! Encryption and key provisioning for SessionVault.
//!
//! Used on platforms without a native secure enclave, where session values
//! live in the fallback encrypted store. This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Database key provisioning (generate once, wrap under a device secret)
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod provision;

pub use aead::{decrypt, encrypt, NONCE_SIZE, TAG_SIZE};
pub use kdf::{derive_database_key, derive_wrapping_key, KdfParams};
pub use keys::{DatabaseKey, Salt, WrappingKey, KEY_LENGTH};
pub use provision::KeyProvisioner;
