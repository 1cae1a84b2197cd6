//! Public Key Encoding
//!
//! Converts public key integers to and from the JWK wire form: big-endian
//! unsigned bytes of minimal length, base64url encoded without padding.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use thiserror::Error;

use crate::algorithm::EcCurve;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid base64url value for {field}")]
    InvalidBase64 { field: &'static str },
    #[error("Integer {field} must be positive")]
    NotPositive { field: &'static str },
    #[error("Unsupported curve: {0}")]
    UnknownCurve(String),
    #[error("Coordinate {field} is {len} bytes, larger than the {curve} field")]
    CoordinateTooLong {
        field: &'static str,
        curve: EcCurve,
        len: usize,
    },
}

/// Strip leading zero bytes, leaving the minimal big-endian representation.
pub fn minimal(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Left-pad a big-endian integer with zeros to exactly `len` bytes.
///
/// Callers must ensure the minimal form fits in `len`.
pub fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let bytes = minimal(bytes);
    let mut padded = vec![0u8; len.saturating_sub(bytes.len())];
    padded.extend_from_slice(bytes);
    padded
}

/// Encode an unsigned big-endian integer.
pub fn encode_unsigned(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(minimal(bytes))
}

/// Decode an unsigned big-endian integer, rejecting zero and malformed input.
pub fn decode_unsigned(value: &str, field: &'static str) -> Result<Vec<u8>, EncodingError> {
    let bytes = decode_base64url(value).map_err(|_| EncodingError::InvalidBase64 { field })?;
    let bytes = minimal(&bytes);
    if bytes.is_empty() {
        return Err(EncodingError::NotPositive { field });
    }
    Ok(bytes.to_vec())
}

/// Encode an RSA public key as `(n, e)`.
pub fn encode_rsa(modulus: &[u8], exponent: &[u8]) -> (String, String) {
    (encode_unsigned(modulus), encode_unsigned(exponent))
}

/// Decode `(n, e)` into minimal big-endian modulus and exponent.
pub fn decode_rsa(n: &str, e: &str) -> Result<(Vec<u8>, Vec<u8>), EncodingError> {
    Ok((decode_unsigned(n, "n")?, decode_unsigned(e, "e")?))
}

/// Encode an EC public point as `(crv, x, y)`.
pub fn encode_ec(curve: EcCurve, x: &[u8], y: &[u8]) -> (String, String, String) {
    (
        curve.name().to_string(),
        encode_unsigned(x),
        encode_unsigned(y),
    )
}

/// Decode `(crv, x, y)`. Coordinates are returned in minimal form.
pub fn decode_ec(crv: &str, x: &str, y: &str) -> Result<(EcCurve, Vec<u8>, Vec<u8>), EncodingError> {
    let curve = EcCurve::from_name(crv).ok_or_else(|| EncodingError::UnknownCurve(crv.to_string()))?;

    let x = decode_coordinate(curve, x, "x")?;
    let y = decode_coordinate(curve, y, "y")?;
    Ok((curve, x, y))
}

fn decode_coordinate(
    curve: EcCurve,
    value: &str,
    field: &'static str,
) -> Result<Vec<u8>, EncodingError> {
    let bytes = decode_base64url(value).map_err(|_| EncodingError::InvalidBase64 { field })?;
    let bytes = minimal(&bytes).to_vec();
    if bytes.len() > curve.field_size() {
        return Err(EncodingError::CoordinateTooLong {
            field,
            curve,
            len: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Encode a signature for the wire (base64url, no padding).
pub fn encode_signature(signature: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(signature)
}

/// Decode base64url, tolerating trailing padding.
pub fn decode_base64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))
}

/// Encode a DER certificate for the `x5c` member (standard, padded base64).
pub fn encode_certificate(der: &[u8]) -> String {
    STANDARD.encode(der)
}
