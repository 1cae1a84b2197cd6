//! In-memory key store
//!
//! A `KeyStoreGateway` that keeps real RSA and ECDSA key pairs in process
//! memory. Used for tests and for running the service without a token.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::rngs::OsRng;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::{Sha256, Sha384, Sha512};
use tracing::debug;

use crate::algorithm::{AlgorithmFamily, EcCurve, SignatureAlgorithm};
use crate::certificate::{self, CertificateRequest};
use crate::error::GatewayError;
use crate::gateway::{KeyStoreGateway, PublicKeyMaterial};
use crate::software;

pub const DEFAULT_RSA_KEY_BITS: usize = 2048;

enum PrivateKey {
    Rsa(RsaPrivateKey),
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    P521(p521::ecdsa::SigningKey),
}

impl PrivateKey {
    fn generate(algorithm: &SignatureAlgorithm, rsa_bits: usize) -> Result<Self, GatewayError> {
        match (algorithm.family(), algorithm.curve()) {
            (AlgorithmFamily::Rsa, _) => RsaPrivateKey::new(&mut OsRng, rsa_bits)
                .map(PrivateKey::Rsa)
                .map_err(|e| GatewayError::KeyGenerationFailed(e.to_string())),
            (AlgorithmFamily::Ec, Some(EcCurve::P256)) => Ok(PrivateKey::P256(
                p256::ecdsa::SigningKey::random(&mut OsRng),
            )),
            (AlgorithmFamily::Ec, Some(EcCurve::P384)) => Ok(PrivateKey::P384(
                p384::ecdsa::SigningKey::random(&mut OsRng),
            )),
            (AlgorithmFamily::Ec, Some(EcCurve::P521)) => Ok(PrivateKey::P521(
                p521::ecdsa::SigningKey::random(&mut OsRng),
            )),
            _ => Err(GatewayError::UnsupportedAlgorithm(algorithm.name().to_string())),
        }
    }

    fn public_key(&self) -> Result<PublicKeyMaterial, GatewayError> {
        let (curve, point) = match self {
            PrivateKey::Rsa(key) => {
                return Ok(PublicKeyMaterial::Rsa {
                    modulus: key.n().to_bytes_be(),
                    exponent: key.e().to_bytes_be(),
                });
            }
            PrivateKey::P256(key) => (
                EcCurve::P256,
                key.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            ),
            PrivateKey::P384(key) => (
                EcCurve::P384,
                key.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            ),
            PrivateKey::P521(key) => (
                EcCurve::P521,
                p521::ecdsa::VerifyingKey::from(key)
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec(),
            ),
        };

        let (x, y) = software::split_uncompressed_point(curve, &point)?;
        Ok(PublicKeyMaterial::Ec { curve, x, y })
    }

    fn sign(&self, algorithm: &SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>, GatewayError> {
        use rsa::pkcs1v15::SigningKey;

        let signature = match (self, algorithm.family(), algorithm.digest_bits()) {
            (PrivateKey::Rsa(key), AlgorithmFamily::Rsa, 256) => {
                SigningKey::<Sha256>::new(key.clone()).sign(data).to_vec()
            }
            (PrivateKey::Rsa(key), AlgorithmFamily::Rsa, 384) => {
                SigningKey::<Sha384>::new(key.clone()).sign(data).to_vec()
            }
            (PrivateKey::Rsa(key), AlgorithmFamily::Rsa, 512) => {
                SigningKey::<Sha512>::new(key.clone()).sign(data).to_vec()
            }
            (PrivateKey::P256(key), _, _) if algorithm.curve() == Some(EcCurve::P256) => {
                let signature: p256::ecdsa::Signature = key.sign(data);
                signature.to_bytes().to_vec()
            }
            (PrivateKey::P384(key), _, _) if algorithm.curve() == Some(EcCurve::P384) => {
                let signature: p384::ecdsa::Signature = key.sign(data);
                signature.to_bytes().to_vec()
            }
            (PrivateKey::P521(key), _, _) if algorithm.curve() == Some(EcCurve::P521) => {
                let signature: p521::ecdsa::Signature = key.sign(data);
                signature.to_bytes().to_vec()
            }
            _ => return Err(GatewayError::UnsupportedAlgorithm(algorithm.name().to_string())),
        };
        Ok(signature)
    }
}

struct StoredKey {
    algorithm: &'static SignatureAlgorithm,
    private_key: PrivateKey,
    certificate: Vec<u8>,
}

/// Key store backed by a map of alias to key pair.
pub struct InMemoryKeyStore {
    rsa_bits: usize,
    keys: RwLock<HashMap<String, StoredKey>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::with_rsa_bits(DEFAULT_RSA_KEY_BITS)
    }

    /// Store generating RSA moduli of `rsa_bits` bits.
    pub fn with_rsa_bits(rsa_bits: usize) -> Self {
        Self {
            rsa_bits,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.keys.read().map(|keys| keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_key<T>(
        &self,
        alias: &str,
        f: impl FnOnce(&StoredKey) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| GatewayError::Store("Key map lock poisoned".into()))?;
        let key = keys
            .get(alias)
            .ok_or_else(|| GatewayError::KeyNotFound(alias.to_string()))?;
        f(key)
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStoreGateway for InMemoryKeyStore {
    fn generate(
        &self,
        subject: &str,
        algorithm: &'static SignatureAlgorithm,
        expires_at: u64,
    ) -> Result<String, GatewayError> {
        let private_key = PrivateKey::generate(algorithm, self.rsa_bits)?;
        let public_key_info = software::subject_public_key_info(&private_key.public_key()?)?;

        let certificate = certificate::issue_self_signed(
            &CertificateRequest {
                subject,
                public_key_info: &public_key_info,
                algorithm,
                not_before: certificate::now(),
                not_after: expires_at,
            },
            |tbs| private_key.sign(algorithm, tbs),
        )?;

        let alias = uuid::Uuid::new_v4().to_string();
        self.keys
            .write()
            .map_err(|_| GatewayError::Store("Key map lock poisoned".into()))?
            .insert(
                alias.clone(),
                StoredKey {
                    algorithm,
                    private_key,
                    certificate,
                },
            );

        debug!(alias = %alias, algorithm = %algorithm, "Stored generated key");
        Ok(alias)
    }

    fn public_key(&self, alias: &str) -> Result<PublicKeyMaterial, GatewayError> {
        self.with_key(alias, |key| key.private_key.public_key())
    }

    fn certificate_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>, GatewayError> {
        self.with_key(alias, |key| Ok(vec![key.certificate.clone()]))
    }

    fn sign(
        &self,
        alias: &str,
        algorithm: &SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, GatewayError> {
        self.with_key(alias, |key| {
            if key.algorithm.family() != algorithm.family()
                || key.algorithm.curve() != algorithm.curve()
            {
                return Err(GatewayError::AlgorithmMismatch {
                    alias: alias.to_string(),
                    algorithm: algorithm.name().to_string(),
                });
            }
            key.private_key.sign(algorithm, data)
        })
    }

    fn delete(&self, alias: &str) -> Result<(), GatewayError> {
        self.keys
            .write()
            .map_err(|_| GatewayError::Store("Key map lock poisoned".into()))?
            .remove(alias);
        Ok(())
    }
}
