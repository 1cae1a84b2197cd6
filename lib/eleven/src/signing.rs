//! Signing Service
//!
//! Validates sign and verify requests and routes them to the gateway, either
//! by alias or with key material supplied in the request.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::algorithm::{self, AlgorithmFamily, SignatureAlgorithm};
use crate::encoding;
use crate::error::ServiceError;
use crate::gateway::{KeySource, KeyStoreGateway, PublicKeyMaterial};
use crate::wire::{JsonWebKey, SignRequest, SignResponse, VerifyRequest, VerifyResponse};

/// Constraint applied to signing input before it reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningInputPolicy {
    /// Any non-empty input is signed as-is.
    #[default]
    AnyNonEmpty,
    /// Input must be a JWS signing input: `base64url(header) "." base64url(payload)`.
    JwsCompact,
}

impl SigningInputPolicy {
    pub fn check(&self, input: &str) -> Result<(), ServiceError> {
        match self {
            SigningInputPolicy::AnyNonEmpty => Ok(()),
            SigningInputPolicy::JwsCompact => {
                let well_formed = input
                    .split_once('.')
                    .is_some_and(|(header, payload)| {
                        is_base64url_segment(header) && is_base64url_segment(payload)
                    });
                if well_formed {
                    Ok(())
                } else {
                    Err(ServiceError::invalid("signingInput is not a JWS signing input"))
                }
            }
        }
    }
}

fn is_base64url_segment(segment: &str) -> bool {
    !segment.is_empty() && encoding::decode_base64url(segment).is_ok() && !segment.contains('=')
}

impl FromStr for SigningInputPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(SigningInputPolicy::AnyNonEmpty),
            "jws" => Ok(SigningInputPolicy::JwsCompact),
            other => Err(format!("unknown signing input policy '{}'", other)),
        }
    }
}

impl fmt::Display for SigningInputPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningInputPolicy::AnyNonEmpty => f.write_str("any"),
            SigningInputPolicy::JwsCompact => f.write_str("jws"),
        }
    }
}

pub struct SigningService {
    gateway: Arc<dyn KeyStoreGateway>,
    policy: SigningInputPolicy,
}

impl SigningService {
    pub fn new(gateway: Arc<dyn KeyStoreGateway>) -> Self {
        Self::with_policy(gateway, SigningInputPolicy::default())
    }

    pub fn with_policy(gateway: Arc<dyn KeyStoreGateway>, policy: SigningInputPolicy) -> Self {
        Self { gateway, policy }
    }

    /// Sign the request's input and return the base64url signature.
    pub fn sign(&self, request: &SignRequest) -> Result<SignResponse, ServiceError> {
        let input = non_empty(&request.signing_input)
            .ok_or_else(|| ServiceError::invalid("signingInput is mandatory"))?;
        let algorithm = resolve(&request.signature_algorithm)?;
        self.policy.check(input)?;

        let signature = match algorithm.family() {
            AlgorithmFamily::None => {
                return Err(ServiceError::invalid("algorithm not supported for signing"));
            }
            AlgorithmFamily::Hmac => {
                let secret = match &request.key {
                    Some(JsonWebKey::Oct { k }) => decode_secret(k)?,
                    Some(_) => return Err(key_mismatch()),
                    None => {
                        return Err(ServiceError::invalid(
                            "an oct key is mandatory for HMAC signing",
                        ));
                    }
                };
                self.gateway
                    .sign_with_secret(&secret, algorithm, input.as_bytes())?
            }
            AlgorithmFamily::Rsa | AlgorithmFamily::Ec => {
                if request.key.is_some() {
                    return Err(ServiceError::invalid(
                        "key material cannot be used for asymmetric signing, use alias",
                    ));
                }
                let alias = non_empty(&request.alias)
                    .ok_or_else(|| ServiceError::invalid("alias is mandatory"))?;
                self.gateway.sign(alias, algorithm, input.as_bytes())?
            }
        };

        debug!(alg = %algorithm, "Signed input");
        Ok(SignResponse {
            signature: encoding::encode_signature(&signature),
        })
    }

    /// Verify a signature. A well-formed request whose signature does not
    /// match returns `valid: false`.
    pub fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, ServiceError> {
        let input = non_empty(&request.signing_input)
            .ok_or_else(|| ServiceError::invalid("signingInput is mandatory"))?;
        let encoded_signature = non_empty(&request.signature)
            .ok_or_else(|| ServiceError::invalid("signature is mandatory"))?;
        if non_empty(&request.signature_algorithm).is_none() {
            return Err(ServiceError::invalid("signatureAlgorithm is mandatory"));
        }
        let algorithm = resolve(&request.signature_algorithm)?;

        let alias = non_empty(&request.alias);
        if alias.is_none() && request.key.is_none() {
            return Err(ServiceError::invalid("alias or key is mandatory"));
        }

        let signature = encoding::decode_base64url(encoded_signature)
            .map_err(|_| ServiceError::invalid("signature is not valid base64url"))?;

        if algorithm.family() == AlgorithmFamily::None {
            return Err(ServiceError::invalid(
                "algorithm not supported for verification",
            ));
        }

        let valid = match (alias, &request.key) {
            (Some(alias), _) => {
                if algorithm.family() == AlgorithmFamily::Hmac {
                    return Err(ServiceError::invalid(
                        "an oct key is mandatory for HMAC verification",
                    ));
                }
                self.gateway.verify(
                    KeySource::Alias(alias),
                    algorithm,
                    input.as_bytes(),
                    &signature,
                )?
            }
            (None, Some(key)) => self.verify_with_key(key, algorithm, input, &signature)?,
            (None, None) => return Err(ServiceError::invalid("alias or key is mandatory")),
        };

        debug!(alg = %algorithm, valid, "Verified signature");
        Ok(VerifyResponse { valid })
    }

    fn verify_with_key(
        &self,
        key: &JsonWebKey,
        algorithm: &SignatureAlgorithm,
        input: &str,
        signature: &[u8],
    ) -> Result<bool, ServiceError> {
        let invalid = |e: encoding::EncodingError| ServiceError::invalid(e.to_string());

        let valid = match (algorithm.family(), key) {
            (AlgorithmFamily::Hmac, JsonWebKey::Oct { k }) => {
                let secret = decode_secret(k)?;
                self.gateway.verify(
                    KeySource::SharedSecret(&secret),
                    algorithm,
                    input.as_bytes(),
                    signature,
                )?
            }
            (AlgorithmFamily::Rsa, JsonWebKey::Rsa { n, e }) => {
                let (modulus, exponent) = encoding::decode_rsa(n, e).map_err(invalid)?;
                let material = PublicKeyMaterial::Rsa { modulus, exponent };
                self.gateway.verify(
                    KeySource::Public(&material),
                    algorithm,
                    input.as_bytes(),
                    signature,
                )?
            }
            (AlgorithmFamily::Ec, JsonWebKey::Ec { crv, x, y }) => {
                let (curve, x, y) = encoding::decode_ec(crv, x, y).map_err(invalid)?;
                if algorithm.curve() != Some(curve) {
                    return Err(key_mismatch());
                }
                let material = PublicKeyMaterial::Ec { curve, x, y };
                self.gateway.verify(
                    KeySource::Public(&material),
                    algorithm,
                    input.as_bytes(),
                    signature,
                )?
            }
            _ => return Err(key_mismatch()),
        };
        Ok(valid)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn resolve(name: &Option<String>) -> Result<&'static SignatureAlgorithm, ServiceError> {
    name.as_deref()
        .and_then(algorithm::resolve)
        .ok_or_else(|| ServiceError::invalid("unsupported signatureAlgorithm"))
}

fn decode_secret(k: &str) -> Result<Vec<u8>, ServiceError> {
    let secret = encoding::decode_base64url(k)
        .map_err(|_| ServiceError::invalid("k is not valid base64url"))?;
    if secret.is_empty() {
        return Err(ServiceError::invalid("k must not be empty"));
    }
    Ok(secret)
}

fn key_mismatch() -> ServiceError {
    ServiceError::invalid("key type does not match signatureAlgorithm")
}
