//! Eleven key-management and signing engine
//!
//! This library provides the algorithm catalog, the key store gateway
//! interface, the key lifecycle and signing services, and the JSON wire types
//! shared with the HTTP service.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod algorithm;
pub mod certificate;
pub mod encoding;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod memory;
pub mod signing;
pub mod software;
pub mod wire;

pub use algorithm::{AlgorithmFamily, EcCurve, SignatureAlgorithm};
pub use error::{ErrorCode, GatewayError, ServiceError};
pub use gateway::{KeySource, KeyStoreGateway, PublicKeyMaterial};
pub use lifecycle::KeyLifecycleService;
pub use memory::InMemoryKeyStore;
pub use signing::{SigningInputPolicy, SigningService};
pub use wire::{
    DeleteKeyRequest, DeleteKeyResponse, ErrorResponse, GenerateKeyRequest, JsonWebKey,
    JwksRequest, JwksResponse, KeyDescriptor, KeyReference, SignRequest, SignResponse,
    VerifyRequest, VerifyResponse,
};
