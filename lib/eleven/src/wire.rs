//! Wire Protocol
//!
//! JSON request and response bodies. Field names follow the service's
//! camelCase convention; JWK members keep their RFC 7517 names.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ServiceError};

/// Public (or shared-secret) key in JWK form, tagged by `kty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum JsonWebKey {
    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
    #[serde(rename = "EC")]
    Ec { crv: String, x: String, y: String },
    #[serde(rename = "oct")]
    Oct { k: String },
}

/// Key descriptor returned by key generation and JWKS lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub kid: String,
    #[serde(flatten)]
    pub key: JsonWebKey,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    pub x5c: Vec<String>,
}

// ==================== Requests ====================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateKeyRequest {
    pub signature_algorithm: Option<String>,
    pub expiration_time: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub signing_input: Option<String>,
    pub alias: Option<String>,
    /// `oct` key carrying the shared secret for HMAC algorithms.
    pub key: Option<JsonWebKey>,
    pub signature_algorithm: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub signing_input: Option<String>,
    pub signature: Option<String>,
    pub alias: Option<String>,
    pub key: Option<JsonWebKey>,
    pub signature_algorithm: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteKeyRequest {
    pub kid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyReference {
    pub kid: String,
    pub alg: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwksRequest {
    #[serde(default)]
    pub keys: Vec<KeyReference>,
}

// ==================== Responses ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteKeyResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<KeyDescriptor>,
}

/// Error body shared by every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub error_description: String,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(e: &ServiceError) -> Self {
        ErrorResponse {
            error: e.code(),
            error_description: e.description(),
        }
    }
}
