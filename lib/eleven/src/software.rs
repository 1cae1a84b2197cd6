//! Software cryptography for public key and shared-secret operations
//!
//! Verification against raw key material, HMAC with caller secrets, and
//! SubjectPublicKeyInfo encoding. Private keys held by a store never pass
//! through here.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use spki::EncodePublicKey;

use crate::algorithm::{AlgorithmFamily, EcCurve, SignatureAlgorithm};
use crate::encoding::{left_pad, minimal};
use crate::error::GatewayError;
use crate::gateway::PublicKeyMaterial;

// ==================== HMAC ====================

pub fn hmac_sign(
    secret: &[u8],
    algorithm: &SignatureAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>, GatewayError> {
    fn tag<M: Mac + KeyInit>(secret: &[u8], data: &[u8]) -> Result<Vec<u8>, GatewayError> {
        Ok(keyed_mac::<M>(secret, data)?.finalize().into_bytes().to_vec())
    }

    match (algorithm.family(), algorithm.digest_bits()) {
        (AlgorithmFamily::Hmac, 256) => tag::<Hmac<Sha256>>(secret, data),
        (AlgorithmFamily::Hmac, 384) => tag::<Hmac<Sha384>>(secret, data),
        (AlgorithmFamily::Hmac, 512) => tag::<Hmac<Sha512>>(secret, data),
        _ => Err(GatewayError::UnsupportedAlgorithm(algorithm.name().to_string())),
    }
}

/// Check an HMAC tag in constant time.
pub fn hmac_verify(
    secret: &[u8],
    algorithm: &SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, GatewayError> {
    fn check<M: Mac + KeyInit>(
        secret: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, GatewayError> {
        Ok(keyed_mac::<M>(secret, data)?.verify_slice(signature).is_ok())
    }

    match (algorithm.family(), algorithm.digest_bits()) {
        (AlgorithmFamily::Hmac, 256) => check::<Hmac<Sha256>>(secret, data, signature),
        (AlgorithmFamily::Hmac, 384) => check::<Hmac<Sha384>>(secret, data, signature),
        (AlgorithmFamily::Hmac, 512) => check::<Hmac<Sha512>>(secret, data, signature),
        _ => Err(GatewayError::UnsupportedAlgorithm(algorithm.name().to_string())),
    }
}

fn keyed_mac<M: Mac + KeyInit>(secret: &[u8], data: &[u8]) -> Result<M, GatewayError> {
    if secret.is_empty() {
        return Err(GatewayError::InvalidKeyMaterial("shared secret is empty".into()));
    }
    let mut mac = <M as KeyInit>::new_from_slice(secret)
        .map_err(|e| GatewayError::InvalidKeyMaterial(e.to_string()))?;
    mac.update(data);
    Ok(mac)
}

// ==================== Public Key Verification ====================

/// Verify a signature against public key material.
///
/// Unparseable signature bytes count as a mismatch, not as an error.
pub fn verify(
    material: &PublicKeyMaterial,
    algorithm: &SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, GatewayError> {
    if !material.supports(algorithm) {
        return Err(GatewayError::InvalidKeyMaterial(format!(
            "{} key cannot verify {}",
            material.family(),
            algorithm
        )));
    }

    match material {
        PublicKeyMaterial::Rsa { modulus, exponent } => {
            let key = rsa_public_key(modulus, exponent)?;
            verify_rsa(key, algorithm, data, signature)
        }
        PublicKeyMaterial::Ec { curve, x, y } => {
            let point = uncompressed_point(*curve, x, y);
            verify_ecdsa(*curve, &point, data, signature)
        }
    }
}

fn verify_rsa(
    key: RsaPublicKey,
    algorithm: &SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, GatewayError> {
    use rsa::pkcs1v15::{Signature, VerifyingKey};

    let Ok(signature) = Signature::try_from(signature) else {
        return Ok(false);
    };

    let valid = match algorithm.digest_bits() {
        256 => VerifyingKey::<Sha256>::new(key).verify(data, &signature).is_ok(),
        384 => VerifyingKey::<Sha384>::new(key).verify(data, &signature).is_ok(),
        512 => VerifyingKey::<Sha512>::new(key).verify(data, &signature).is_ok(),
        _ => return Err(GatewayError::UnsupportedAlgorithm(algorithm.name().to_string())),
    };
    Ok(valid)
}

fn verify_ecdsa(
    curve: EcCurve,
    point: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<bool, GatewayError> {
    let invalid_point = |e: p256::ecdsa::Error| {
        GatewayError::InvalidKeyMaterial(format!("Invalid {} point: {}", curve, e))
    };

    let valid = match curve {
        EcCurve::P256 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(point).map_err(invalid_point)?;
            let Ok(signature) = p256::ecdsa::Signature::from_slice(signature) else {
                return Ok(false);
            };
            key.verify(data, &signature).is_ok()
        }
        EcCurve::P384 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(point).map_err(invalid_point)?;
            let Ok(signature) = p384::ecdsa::Signature::from_slice(signature) else {
                return Ok(false);
            };
            key.verify(data, &signature).is_ok()
        }
        EcCurve::P521 => {
            let key = p521::ecdsa::VerifyingKey::from_sec1_bytes(point).map_err(invalid_point)?;
            let Ok(signature) = p521::ecdsa::Signature::from_slice(signature) else {
                return Ok(false);
            };
            key.verify(data, &signature).is_ok()
        }
    };
    Ok(valid)
}

// ==================== Key Encoding ====================

pub fn rsa_public_key(modulus: &[u8], exponent: &[u8]) -> Result<RsaPublicKey, GatewayError> {
    RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        BigUint::from_bytes_be(exponent),
    )
    .map_err(|e| GatewayError::InvalidKeyMaterial(format!("Invalid RSA key: {}", e)))
}

/// SEC1 uncompressed point `04 || x || y` with coordinates padded to the field size.
pub fn uncompressed_point(curve: EcCurve, x: &[u8], y: &[u8]) -> Vec<u8> {
    let size = curve.field_size();
    let mut point = Vec::with_capacity(1 + 2 * size);
    point.push(0x04);
    point.extend_from_slice(&left_pad(x, size));
    point.extend_from_slice(&left_pad(y, size));
    point
}

/// Split a SEC1 uncompressed point into minimal `(x, y)` coordinates.
pub fn split_uncompressed_point(
    curve: EcCurve,
    point: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), GatewayError> {
    let size = curve.field_size();
    if point.len() != 1 + 2 * size || point[0] != 0x04 {
        return Err(GatewayError::InvalidKeyMaterial(format!(
            "Unexpected {} point format: {} bytes, first byte 0x{:02x}",
            curve,
            point.len(),
            point.first().copied().unwrap_or(0)
        )));
    }

    let x = minimal(&point[1..1 + size]).to_vec();
    let y = minimal(&point[1 + size..]).to_vec();
    Ok((x, y))
}

/// DER SubjectPublicKeyInfo for public key material.
pub fn subject_public_key_info(material: &PublicKeyMaterial) -> Result<Vec<u8>, GatewayError> {
    let document = match material {
        PublicKeyMaterial::Rsa { modulus, exponent } => {
            rsa_public_key(modulus, exponent)?.to_public_key_der()
        }
        PublicKeyMaterial::Ec { curve, x, y } => {
            let point = uncompressed_point(*curve, x, y);
            let invalid = |e: p256::elliptic_curve::Error| {
                GatewayError::InvalidKeyMaterial(format!("Invalid {} point: {}", curve, e))
            };
            match curve {
                EcCurve::P256 => p256::PublicKey::from_sec1_bytes(&point)
                    .map_err(invalid)?
                    .to_public_key_der(),
                EcCurve::P384 => p384::PublicKey::from_sec1_bytes(&point)
                    .map_err(invalid)?
                    .to_public_key_der(),
                EcCurve::P521 => p521::PublicKey::from_sec1_bytes(&point)
                    .map_err(invalid)?
                    .to_public_key_der(),
            }
        }
    };

    document
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| GatewayError::Certificate(format!("Failed to encode public key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{ES256, ES384, HS256, HS512, RS256};
    use rsa::signature::Signer;

    fn p256_key() -> (p256::ecdsa::SigningKey, PublicKeyMaterial) {
        let signing_key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let (x, y) = split_uncompressed_point(EcCurve::P256, point.as_bytes()).unwrap();
        (signing_key, PublicKeyMaterial::Ec { curve: EcCurve::P256, x, y })
    }

    // ==================== HMAC Tests ====================

    #[test]
    fn test_hmac_sha256_known_answer() {
        // RFC 4231 test case 2
        let mac = hmac_sign(b"Jefe", &HS256, b"what do ya want for nothing?").unwrap();
        assert_eq!(
            mac,
            hex_literal("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
    }

    #[test]
    fn test_hmac_verify() {
        let mac = hmac_sign(b"secret", &HS512, b"payload").unwrap();
        assert_eq!(mac.len(), 64);
        assert!(hmac_verify(b"secret", &HS512, b"payload", &mac).unwrap());
        assert!(!hmac_verify(b"other", &HS512, b"payload", &mac).unwrap());
        assert!(!hmac_verify(b"secret", &HS512, b"payload", &mac[..32]).unwrap());

        let mut flipped = mac.clone();
        flipped[63] ^= 0x01;
        assert!(!hmac_verify(b"secret", &HS512, b"payload", &flipped).unwrap());
        assert!(matches!(
            hmac_verify(b"", &HS512, b"payload", &mac),
            Err(GatewayError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_hmac_rejects_non_hmac_algorithm() {
        assert!(matches!(
            hmac_sign(b"secret", &RS256, b"payload"),
            Err(GatewayError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            hmac_sign(b"", &HS256, b"payload"),
            Err(GatewayError::InvalidKeyMaterial(_))
        ));
    }

    // ==================== ECDSA Tests ====================

    #[test]
    fn test_ecdsa_verify() {
        let (signing_key, material) = p256_key();
        let signature: p256::ecdsa::Signature = signing_key.sign(b"message");
        let bytes = signature.to_bytes().to_vec();

        assert!(verify(&material, &ES256, b"message", &bytes).unwrap());
        assert!(!verify(&material, &ES256, b"other message", &bytes).unwrap());
        assert!(!verify(&material, &ES256, b"message", &bytes[..10]).unwrap());
    }

    #[test]
    fn test_verify_rejects_curve_mismatch() {
        let (_, material) = p256_key();
        assert!(matches!(
            verify(&material, &ES384, b"message", &[0u8; 96]),
            Err(GatewayError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_verify_rejects_point_off_curve() {
        let material = PublicKeyMaterial::Ec {
            curve: EcCurve::P256,
            x: vec![1; 32],
            y: vec![2; 32],
        };
        assert!(matches!(
            verify(&material, &ES256, b"message", &[0u8; 64]),
            Err(GatewayError::InvalidKeyMaterial(_))
        ));
    }

    // ==================== Point Tests ====================

    #[test]
    fn test_split_uncompressed_point_round_trip() {
        let (_, material) = p256_key();
        let PublicKeyMaterial::Ec { curve, x, y } = &material else {
            panic!("expected EC material");
        };
        let point = uncompressed_point(*curve, x, y);
        assert_eq!(point.len(), 65);
        assert_eq!(split_uncompressed_point(*curve, &point).unwrap(), (x.clone(), y.clone()));
    }

    #[test]
    fn test_split_rejects_compressed_point() {
        let mut point = vec![0x02];
        point.extend_from_slice(&[7u8; 32]);
        assert!(split_uncompressed_point(EcCurve::P256, &point).is_err());
    }

    #[test]
    fn test_subject_public_key_info_is_der_sequence() {
        let (_, material) = p256_key();
        let spki = subject_public_key_info(&material).unwrap();
        assert_eq!(spki[0], 0x30);
    }

    fn hex_literal(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }
}
