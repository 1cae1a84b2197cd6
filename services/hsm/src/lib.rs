//! Eleven HSM Service
//!
//! Remote key-management and signing service. Private keys live on a
//! PKCS#11 token (SoftHSM2 by default) and are referenced by an opaque
//! alias; callers get public keys as JWKs with a self-signed certificate.
//!
//! Key features:
//! - RSA (RS256/384/512) and ECDSA (ES256/384/512) key generation
//! - Signing by alias, HMAC with caller-supplied secrets
//! - Verification by alias or with a supplied JWK

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod config;
pub mod handlers;
pub mod pkcs11;
pub mod server;

pub use config::ServiceConfig;
pub use pkcs11::Pkcs11KeyStore;
