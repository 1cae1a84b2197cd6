//! Eleven HSM Service REST API Handlers

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use eleven::{
    DeleteKeyRequest, DeleteKeyResponse, ErrorCode, ErrorResponse, GatewayError,
    GenerateKeyRequest, JwksRequest, JwksResponse, KeyDescriptor, KeyLifecycleService,
    ServiceError, SignRequest, SignResponse, SigningService, VerifyRequest, VerifyResponse,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Shared application state
pub struct AppState {
    pub keys: KeyLifecycleService,
    pub signing: SigningService,
    /// Subject and issuer DN of generated certificates
    pub subject_name: String,
}

// ==================== Error Handling ====================

pub struct ApiError(pub StatusCode, pub Json<ErrorResponse>);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: ErrorCode::InvalidRequest,
                error_description: msg.into(),
            }),
        )
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status = match &e {
            ServiceError::InvalidRequest(msg) => {
                debug!("Rejected request: {}", msg);
                StatusCode::BAD_REQUEST
            }
            ServiceError::Internal(cause) => {
                error!("Request failed: {}", cause);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, Json(ErrorResponse::from(&e)))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {}", rejection.body_text());
        ApiError::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

/// Run a store operation off the async workers.
async fn blocking<T, F>(state: Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T, ServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            ServiceError::Internal(GatewayError::Store(format!("Store task failed: {}", e)))
        })?
        .map_err(ApiError::from)
}

// ==================== Handlers ====================

/// Health check
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Generate a key pair and self-signed certificate, returning its JWK descriptor
pub async fn generate_key(
    State(state): State<Arc<AppState>>,
    request: Result<Json<GenerateKeyRequest>, JsonRejection>,
) -> Result<Json<KeyDescriptor>, ApiError> {
    let Json(request) = request?;
    let algorithm = request.signature_algorithm.unwrap_or_default();

    let descriptor = blocking(state, move |state| {
        state
            .keys
            .generate_key(&state.subject_name, &algorithm, request.expiration_time)
    })
    .await?;

    Ok(Json(descriptor))
}

/// Sign input with a stored key (RSA/EC) or a supplied secret (HMAC)
pub async fn sign(
    State(state): State<Arc<AppState>>,
    request: Result<Json<SignRequest>, JsonRejection>,
) -> Result<Json<SignResponse>, ApiError> {
    let Json(request) = request?;
    let response = blocking(state, move |state| state.signing.sign(&request)).await?;
    Ok(Json(response))
}

/// Verify a signature against a stored key or a supplied JWK
pub async fn verify_signature(
    State(state): State<Arc<AppState>>,
    request: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(request) = request?;
    let response = blocking(state, move |state| state.signing.verify(&request)).await?;
    Ok(Json(response))
}

/// Delete a key pair and its certificate
pub async fn delete_key(
    State(state): State<Arc<AppState>>,
    request: Result<Json<DeleteKeyRequest>, JsonRejection>,
) -> Result<Json<DeleteKeyResponse>, ApiError> {
    let Json(request) = request?;
    let kid = request.kid.unwrap_or_default();

    blocking(state, move |state| state.keys.delete_key(&kid)).await?;
    Ok(Json(DeleteKeyResponse { deleted: true }))
}

/// Public JWKs for the requested keys
pub async fn jwks(
    State(state): State<Arc<AppState>>,
    request: Result<Json<JwksRequest>, JsonRejection>,
) -> Result<Json<JwksResponse>, ApiError> {
    let Json(request) = request?;

    let keys = blocking(state, move |state| {
        request
            .keys
            .iter()
            .map(|key| state.keys.describe_key(&key.kid, &key.alg))
            .collect::<Result<Vec<_>, _>>()
    })
    .await?;

    Ok(Json(JwksResponse { keys }))
}
