#![allow(clippy::unwrap_used, clippy::expect_used)]
//! HTTP tests for the Eleven HSM service
//!
//! Drives the router in-process against the in-memory key store.

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use base64::Engine;
use eleven::{InMemoryKeyStore, certificate};
use eleven_hsm::{ServiceConfig, server};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app_with(vars: &[(&'static str, &'static str)]) -> Router {
    let config = ServiceConfig::from_lookup(|var| {
        vars.iter()
            .find(|(name, _)| *name == var)
            .map(|(_, value)| value.to_string())
            .or_else(|| (var == "KEY_STORE").then(|| "memory".to_string()))
    })
    .unwrap();
    let store = Arc::new(InMemoryKeyStore::with_rsa_bits(1024));
    server::create_router(server::app_state(store, &config))
}

fn create_test_app() -> Router {
    create_test_app_with(&[])
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, body) = send(app, request).await;
    (status, body)
}

fn expiration() -> u64 {
    certificate::now() + 3600
}

async fn generate(app: &Router, alg: &str) -> Value {
    let (status, body) = post(
        app,
        "/generateKey",
        json!({ "signatureAlgorithm": alg, "expirationTime": expiration() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body
}

async fn sign(app: &Router, kid: &str, alg: &str, input: &str) -> String {
    let (status, body) = post(
        app,
        "/sign",
        json!({ "signingInput": input, "alias": kid, "signatureAlgorithm": alg }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["signature"].as_str().unwrap().to_string()
}

fn b64url_decode(value: &str) -> Vec<u8> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(value)
        .unwrap()
}

fn assert_invalid_request(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(body["error"], "invalid_request");
    assert!(body["error_description"].is_string());
}

// ==================== Health Check Tests ====================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

// ==================== Generate Key Tests ====================

#[tokio::test]
async fn test_generate_rs256_key() {
    let app = create_test_app();
    let exp = expiration();
    let (status, body) = post(
        &app,
        "/generateKey",
        json!({ "signatureAlgorithm": "RS256", "expirationTime": exp }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body["kid"].as_str().unwrap().is_empty());
    assert_eq!(body["kty"], "RSA");
    assert_eq!(body["use"], "sig");
    assert_eq!(body["alg"], "RS256");
    assert_eq!(body["exp"], exp);
    assert!(body.get("crv").is_none());

    let n = b64url_decode(body["n"].as_str().unwrap());
    assert_eq!(n.len(), 128);
    assert_ne!(n[0], 0);
    assert_eq!(b64url_decode(body["e"].as_str().unwrap()), vec![1, 0, 1]);

    let x5c = body["x5c"].as_array().unwrap();
    assert_eq!(x5c.len(), 1);
    let der = base64::engine::general_purpose::STANDARD
        .decode(x5c[0].as_str().unwrap())
        .unwrap();
    assert_eq!(certificate::not_after(&der).unwrap(), exp);
}

#[tokio::test]
async fn test_generate_ec_keys() {
    let app = create_test_app();
    for (alg, crv, size) in [
        ("ES256", "P-256", 32),
        ("ES384", "P-384", 48),
        ("ES512", "P-521", 66),
    ] {
        let body = generate(&app, alg).await;
        assert_eq!(body["kty"], "EC");
        assert_eq!(body["crv"], crv);
        assert!(b64url_decode(body["x"].as_str().unwrap()).len() <= size);
        assert!(b64url_decode(body["y"].as_str().unwrap()).len() <= size);
        assert!(body.get("n").is_none());
    }
}

#[tokio::test]
async fn test_generate_rejects_bad_requests() {
    let app = create_test_app();

    let (status, body) = post(
        &app,
        "/generateKey",
        json!({ "signatureAlgorithm": "RS1024", "expirationTime": expiration() }),
    )
    .await;
    assert_invalid_request(status, &body);
    assert_eq!(body["error_description"], "unsupported signatureAlgorithm");

    let (status, body) = post(&app, "/generateKey", json!({ "signatureAlgorithm": "ES256" })).await;
    assert_invalid_request(status, &body);
    assert_eq!(body["error_description"], "expiration time is mandatory");

    for alg in ["HS256", "none"] {
        let (status, body) = post(
            &app,
            "/generateKey",
            json!({ "signatureAlgorithm": alg, "expirationTime": expiration() }),
        )
        .await;
        assert_invalid_request(status, &body);
    }
}

// ==================== Sign / Verify Tests ====================

#[tokio::test]
async fn test_rs256_signature_length_matches_modulus() {
    let app = create_test_app();
    let key = generate(&app, "RS256").await;
    let kid = key["kid"].as_str().unwrap();

    let signature = sign(&app, kid, "RS256", "abc").await;
    assert!(!signature.contains('='));
    assert_eq!(b64url_decode(&signature).len(), 128);
}

#[tokio::test]
async fn test_sign_then_verify() {
    let app = create_test_app();
    let key = generate(&app, "ES256").await;
    let kid = key["kid"].as_str().unwrap();
    let signature = sign(&app, kid, "ES256", "header.payload").await;

    let (status, body) = post(
        &app,
        "/verifySignature",
        json!({
            "signingInput": "header.payload",
            "signature": signature,
            "alias": kid,
            "signatureAlgorithm": "ES256",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "valid": true }));
}

#[tokio::test]
async fn test_flipped_signature_is_valid_false() {
    let app = create_test_app();
    let key = generate(&app, "RS384").await;
    let kid = key["kid"].as_str().unwrap();

    let mut bytes = b64url_decode(&sign(&app, kid, "RS384", "abc").await);
    bytes[10] ^= 0x80;
    let tampered = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes);

    let (status, body) = post(
        &app,
        "/verifySignature",
        json!({
            "signingInput": "abc",
            "signature": tampered,
            "alias": kid,
            "signatureAlgorithm": "RS384",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_verify_with_jwk_from_generate() {
    let app = create_test_app();
    let key = generate(&app, "ES384").await;
    let kid = key["kid"].as_str().unwrap();
    let signature = sign(&app, kid, "ES384", "abc").await;

    let jwk = json!({
        "kty": key["kty"],
        "crv": key["crv"],
        "x": key["x"],
        "y": key["y"],
    });
    let (status, body) = post(
        &app,
        "/verifySignature",
        json!({
            "signingInput": "abc",
            "signature": signature,
            "key": jwk,
            "signatureAlgorithm": "ES384",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_verify_without_algorithm_is_invalid_request() {
    let app = create_test_app();
    let (status, body) = post(
        &app,
        "/verifySignature",
        json!({ "signingInput": "abc", "signature": "c2ln", "alias": "k" }),
    )
    .await;
    assert_invalid_request(status, &body);
}

#[tokio::test]
async fn test_hs256_verify_without_key_or_alias() {
    let app = create_test_app();
    let (status, body) = post(
        &app,
        "/verifySignature",
        json!({ "signingInput": "abc", "signature": "c2ln", "signatureAlgorithm": "HS256" }),
    )
    .await;
    assert_invalid_request(status, &body);
}

#[tokio::test]
async fn test_hmac_round_trip_with_oct_key() {
    let app = create_test_app();
    let key = json!({ "kty": "oct", "k": "c2VjcmV0LWtleS1tYXRlcmlhbA" });

    let (status, body) = post(
        &app,
        "/sign",
        json!({ "signingInput": "abc", "key": key, "signatureAlgorithm": "HS256" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let signature = body["signature"].as_str().unwrap().to_string();
    assert_eq!(b64url_decode(&signature).len(), 32);

    let (status, body) = post(
        &app,
        "/verifySignature",
        json!({
            "signingInput": "abc",
            "signature": signature,
            "key": key,
            "signatureAlgorithm": "HS256",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_sign_with_unknown_alias() {
    let app = create_test_app();
    let (status, body) = post(
        &app,
        "/sign",
        json!({ "signingInput": "abc", "alias": "unknown", "signatureAlgorithm": "ES256" }),
    )
    .await;
    assert_invalid_request(status, &body);
}

#[tokio::test]
async fn test_jws_policy_rejects_plain_input() {
    let app = create_test_app_with(&[("SIGNING_INPUT_POLICY", "jws")]);
    let key = generate(&app, "ES256").await;
    let kid = key["kid"].as_str().unwrap();

    let (status, body) = post(
        &app,
        "/sign",
        json!({ "signingInput": "not a jws", "alias": kid, "signatureAlgorithm": "ES256" }),
    )
    .await;
    assert_invalid_request(status, &body);

    sign(&app, kid, "ES256", "eyJhbGciOiJFUzI1NiJ9.eyJzdWIiOiIxIn0").await;
}

// ==================== Delete / JWKS Tests ====================

#[tokio::test]
async fn test_delete_then_sign_is_invalid_request() {
    let app = create_test_app();
    let key = generate(&app, "ES256").await;
    let kid = key["kid"].as_str().unwrap();

    let (status, body) = post(&app, "/deleteKey", json!({ "kid": kid })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "deleted": true }));

    // Idempotent
    let (status, _) = post(&app, "/deleteKey", json!({ "kid": kid })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(
        &app,
        "/sign",
        json!({ "signingInput": "abc", "alias": kid, "signatureAlgorithm": "ES256" }),
    )
    .await;
    assert_invalid_request(status, &body);
}

#[tokio::test]
async fn test_jwks_returns_generated_descriptors() {
    let app = create_test_app();
    let rsa = generate(&app, "RS512").await;
    let ec = generate(&app, "ES256").await;

    let (status, body) = post(
        &app,
        "/jwks",
        json!({ "keys": [
            { "kid": rsa["kid"], "alg": "RS512" },
            { "kid": ec["kid"], "alg": "ES256" },
        ] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["keys"], json!([rsa, ec]));

    let (status, body) = post(
        &app,
        "/jwks",
        json!({ "keys": [{ "kid": "missing", "alg": "ES256" }] }),
    )
    .await;
    assert_invalid_request(status, &body);
}

// ==================== Transport Tests ====================

#[tokio::test]
async fn test_responses_are_not_cacheable() {
    let app = create_test_app();
    let ok = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let bad = Request::builder()
        .method("POST")
        .uri("/sign")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    for request in [ok, bad] {
        let (_, headers, _) = send(&app, request).await;
        assert_eq!(headers[header::CACHE_CONTROL], "no-store, no-cache");
        assert_eq!(headers[header::PRAGMA], "no-cache");
    }
}

#[tokio::test]
async fn test_malformed_json_is_invalid_request() {
    let app = create_test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/generateKey")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, _, body) = send(&app, request).await;
    assert_invalid_request(status, &body);
}
