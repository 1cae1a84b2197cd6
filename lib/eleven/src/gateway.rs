//! Key Store Gateway
//!
//! Capability interface over the store that owns private key material.
//! The core only ever holds aliases and public artifacts; every operation
//! that touches a private key goes through this trait.

use crate::algorithm::{AlgorithmFamily, EcCurve, SignatureAlgorithm};
use crate::error::GatewayError;
use crate::software;

/// Public half of a key pair, as big-endian unsigned integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    Rsa {
        modulus: Vec<u8>,
        exponent: Vec<u8>,
    },
    Ec {
        curve: EcCurve,
        x: Vec<u8>,
        y: Vec<u8>,
    },
}

impl PublicKeyMaterial {
    pub fn family(&self) -> AlgorithmFamily {
        match self {
            PublicKeyMaterial::Rsa { .. } => AlgorithmFamily::Rsa,
            PublicKeyMaterial::Ec { .. } => AlgorithmFamily::Ec,
        }
    }

    /// Whether this key can be used with `algorithm` (family and curve agree).
    pub fn supports(&self, algorithm: &SignatureAlgorithm) -> bool {
        match self {
            PublicKeyMaterial::Rsa { .. } => algorithm.family() == AlgorithmFamily::Rsa,
            PublicKeyMaterial::Ec { curve, .. } => algorithm.curve() == Some(*curve),
        }
    }
}

/// Key used to check a signature.
#[derive(Debug, Clone, Copy)]
pub enum KeySource<'a> {
    /// A key pair held by the store.
    Alias(&'a str),
    /// Externally supplied public key.
    Public(&'a PublicKeyMaterial),
    /// Caller-supplied HMAC secret.
    SharedSecret(&'a [u8]),
}

/// Capability interface over the opaque key store.
///
/// Implementations must make an alias visible to `sign`/`public_key` only
/// once `generate` has committed both the key pair and its certificate, and
/// must serialize access to the underlying store themselves.
pub trait KeyStoreGateway: Send + Sync {
    /// Generate a key pair plus a self-signed certificate for `subject`,
    /// valid until `expires_at` (epoch seconds). Returns the new alias.
    fn generate(
        &self,
        subject: &str,
        algorithm: &'static SignatureAlgorithm,
        expires_at: u64,
    ) -> Result<String, GatewayError>;

    fn public_key(&self, alias: &str) -> Result<PublicKeyMaterial, GatewayError>;

    /// DER certificates for the alias, leaf first.
    fn certificate_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>, GatewayError>;

    /// Sign `data` with the private key behind `alias`.
    ///
    /// ECDSA signatures are returned in the fixed-size `r || s` form.
    fn sign(
        &self,
        alias: &str,
        algorithm: &SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, GatewayError>;

    /// Remove the key pair and its certificate. Deleting an unknown alias is not an error.
    fn delete(&self, alias: &str) -> Result<(), GatewayError>;

    /// MAC `data` with a caller-supplied secret.
    fn sign_with_secret(
        &self,
        secret: &[u8],
        algorithm: &SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, GatewayError> {
        software::hmac_sign(secret, algorithm, data)
    }

    /// Check `signature` over `data`.
    ///
    /// A signature that simply does not match yields `Ok(false)`; errors are
    /// reserved for unusable keys and store failures.
    fn verify(
        &self,
        key: KeySource<'_>,
        algorithm: &SignatureAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, GatewayError> {
        match key {
            KeySource::Alias(alias) => {
                let material = self.public_key(alias)?;
                if !material.supports(algorithm) {
                    return Err(GatewayError::AlgorithmMismatch {
                        alias: alias.to_string(),
                        algorithm: algorithm.name().to_string(),
                    });
                }
                software::verify(&material, algorithm, data, signature)
            }
            KeySource::Public(material) => software::verify(material, algorithm, data, signature),
            KeySource::SharedSecret(secret) => {
                software::hmac_verify(secret, algorithm, data, signature)
            }
        }
    }
}
