//! Eleven Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a key store gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Algorithm {algorithm} does not match key {alias}")]
    AlgorithmMismatch { alias: String, algorithm: String },

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Key store error: {0}")]
    Store(String),
}

impl GatewayError {
    /// Whether the failure was caused by the caller's input rather than the store.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            GatewayError::KeyNotFound(_)
                | GatewayError::AlgorithmMismatch { .. }
                | GatewayError::InvalidKeyMaterial(_)
        )
    }
}

/// Wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InternalError,
}

/// Errors returned by the key lifecycle and signing services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(#[source] GatewayError),
}

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ServiceError::InvalidRequest(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ServiceError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Text safe to return to the caller. Internal causes are never exposed.
    pub fn description(&self) -> String {
        match self {
            ServiceError::InvalidRequest(msg) => msg.clone(),
            ServiceError::Internal(_) => {
                "The server encountered an unexpected condition which prevented it from fulfilling the request.".to_string()
            }
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(e: GatewayError) -> Self {
        if e.is_caller_error() {
            ServiceError::InvalidRequest(e.to_string())
        } else {
            ServiceError::Internal(e)
        }
    }
}
