//! Key Lifecycle Service
//!
//! Validates key generation requests, drives the gateway and assembles the
//! JWK-style descriptor returned to callers.

use std::sync::Arc;

use tracing::{info, warn};

use crate::algorithm::{self, SignatureAlgorithm};
use crate::certificate;
use crate::encoding;
use crate::error::{GatewayError, ServiceError};
use crate::gateway::{KeyStoreGateway, PublicKeyMaterial};
use crate::wire::{JsonWebKey, KeyDescriptor};

pub const KEY_USE_SIGNATURE: &str = "sig";

pub struct KeyLifecycleService {
    gateway: Arc<dyn KeyStoreGateway>,
}

impl KeyLifecycleService {
    pub fn new(gateway: Arc<dyn KeyStoreGateway>) -> Self {
        Self { gateway }
    }

    /// Generate a key pair and self-signed certificate in the store.
    ///
    /// Checks run in a fixed order and the first failure is reported:
    /// algorithm known, expiration present, algorithm asymmetric, expiration
    /// representable in a certificate.
    pub fn generate_key(
        &self,
        subject_name: &str,
        algorithm_name: &str,
        expires_at: Option<u64>,
    ) -> Result<KeyDescriptor, ServiceError> {
        let algorithm = algorithm::resolve(algorithm_name)
            .ok_or_else(|| ServiceError::invalid("unsupported signatureAlgorithm"))?;
        let expires_at =
            expires_at.ok_or_else(|| ServiceError::invalid("expiration time is mandatory"))?;
        if !algorithm.family().is_asymmetric() {
            return Err(ServiceError::invalid(
                "algorithm not supported for key generation",
            ));
        }
        if expires_at > certificate::MAX_NOT_AFTER {
            return Err(ServiceError::invalid("expiration time is out of range"));
        }

        let alias = self.gateway.generate(subject_name, algorithm, expires_at)?;
        let descriptor = match self.assemble(&alias, algorithm, expires_at) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                // The caller never learns the alias, so the key is unreachable
                if let Err(cleanup) = self.gateway.delete(&alias) {
                    warn!(kid = %alias, error = %cleanup, "Failed to remove undescribed key");
                }
                return Err(e);
            }
        };

        info!(kid = %alias, alg = %algorithm, exp = expires_at, "Generated key");
        Ok(descriptor)
    }

    /// Descriptor of an existing key, with `exp` taken from its certificate.
    pub fn describe_key(
        &self,
        alias: &str,
        algorithm_name: &str,
    ) -> Result<KeyDescriptor, ServiceError> {
        let algorithm = algorithm::resolve(algorithm_name)
            .filter(|alg| alg.family().is_asymmetric())
            .ok_or_else(|| ServiceError::invalid("unsupported signatureAlgorithm"))?;
        if alias.is_empty() {
            return Err(ServiceError::invalid("kid is mandatory"));
        }

        let material = self.gateway.public_key(alias)?;
        if !material.supports(algorithm) {
            return Err(GatewayError::AlgorithmMismatch {
                alias: alias.to_string(),
                algorithm: algorithm.name().to_string(),
            }
            .into());
        }

        let chain = self.gateway.certificate_chain(alias)?;
        let leaf = chain
            .first()
            .ok_or_else(|| GatewayError::Certificate(format!("No certificate for {}", alias)))?;
        let expires_at = certificate::not_after(leaf)?;

        Ok(descriptor(alias, algorithm, &material, &chain, expires_at))
    }

    /// Delete a key. Unknown aliases are accepted.
    pub fn delete_key(&self, alias: &str) -> Result<(), ServiceError> {
        if alias.is_empty() {
            return Err(ServiceError::invalid("kid is mandatory"));
        }
        self.gateway.delete(alias)?;
        info!(kid = %alias, "Deleted key");
        Ok(())
    }

    fn assemble(
        &self,
        alias: &str,
        algorithm: &SignatureAlgorithm,
        expires_at: u64,
    ) -> Result<KeyDescriptor, ServiceError> {
        let material = self.gateway.public_key(alias)?;
        if !material.supports(algorithm) {
            return Err(ServiceError::Internal(GatewayError::Store(format!(
                "Store returned a {} key for {}",
                material.family(),
                algorithm
            ))));
        }

        let chain = self.gateway.certificate_chain(alias)?;
        if chain.is_empty() {
            return Err(ServiceError::Internal(GatewayError::Certificate(format!(
                "No certificate for {}",
                alias
            ))));
        }

        Ok(descriptor(alias, algorithm, &material, &chain, expires_at))
    }
}

fn descriptor(
    alias: &str,
    algorithm: &SignatureAlgorithm,
    material: &PublicKeyMaterial,
    chain: &[Vec<u8>],
    expires_at: u64,
) -> KeyDescriptor {
    KeyDescriptor {
        kid: alias.to_string(),
        key: to_jwk(material),
        key_use: KEY_USE_SIGNATURE.to_string(),
        alg: algorithm.name().to_string(),
        exp: Some(expires_at),
        x5c: chain.iter().map(|der| encoding::encode_certificate(der)).collect(),
    }
}

/// JWK members for public key material.
pub fn to_jwk(material: &PublicKeyMaterial) -> JsonWebKey {
    match material {
        PublicKeyMaterial::Rsa { modulus, exponent } => {
            let (n, e) = encoding::encode_rsa(modulus, exponent);
            JsonWebKey::Rsa { n, e }
        }
        PublicKeyMaterial::Ec { curve, x, y } => {
            let (crv, x, y) = encoding::encode_ec(*curve, x, y);
            JsonWebKey::Ec { crv, x, y }
        }
    }
}
