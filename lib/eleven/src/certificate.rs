//! Self-signed certificate issuance
//!
//! Builds an X.509 v3 certificate around a freshly generated public key.
//! The TBS bytes are handed to a signing closure so the private key can stay
//! inside whatever store owns it.

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use der::asn1::{Any, BitString, GeneralizedTime, UtcTime};
use der::{Decode, Encode};
use spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::{Certificate, TbsCertificate, Version};

use crate::algorithm::{AlgorithmFamily, EcCurve, SignatureAlgorithm};
use crate::error::GatewayError;

const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const ECDSA_WITH_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");

/// Latest `notAfter` a certificate can carry: 9999-12-31T23:59:59Z.
pub const MAX_NOT_AFTER: u64 = 253_402_300_799;

/// Parameters of a self-signed certificate.
pub struct CertificateRequest<'a> {
    /// Distinguished name used as both subject and issuer, e.g. `CN=Eleven`.
    pub subject: &'a str,
    /// DER SubjectPublicKeyInfo of the certified key.
    pub public_key_info: &'a [u8],
    pub algorithm: &'a SignatureAlgorithm,
    pub not_before: u64,
    pub not_after: u64,
}

/// Issue a self-signed certificate and return its DER encoding.
///
/// `sign` receives the DER `TBSCertificate` and must return a signature in
/// the store's native form (PKCS#1 v1.5 bytes, or `r || s` for ECDSA).
pub fn issue_self_signed<F>(
    request: &CertificateRequest<'_>,
    sign: F,
) -> Result<Vec<u8>, GatewayError>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>, GatewayError>,
{
    let signature_algorithm = algorithm_identifier(request.algorithm)?;
    let name = Name::from_str(request.subject)
        .map_err(|e| cert_error("Invalid subject name", e))?;
    let subject_public_key_info = SubjectPublicKeyInfoOwned::from_der(request.public_key_info)
        .map_err(|e| cert_error("Invalid public key info", e))?;

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: random_serial_number()?,
        signature: signature_algorithm.clone(),
        issuer: name.clone(),
        validity: Validity {
            not_before: to_time(request.not_before)?,
            not_after: to_time(request.not_after)?,
        },
        subject: name,
        subject_public_key_info,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };

    let tbs_der = tbs_certificate
        .to_der()
        .map_err(|e| cert_error("Failed to encode TBS certificate", e))?;
    let raw_signature = sign(&tbs_der)?;

    let signature_bytes = match request.algorithm.family() {
        AlgorithmFamily::Ec => ecdsa_signature_der(request.algorithm, &raw_signature)?,
        _ => raw_signature,
    };

    let certificate = Certificate {
        tbs_certificate,
        signature_algorithm,
        signature: BitString::from_bytes(&signature_bytes)
            .map_err(|e| cert_error("Invalid signature bits", e))?,
    };

    certificate
        .to_der()
        .map_err(|e| cert_error("Failed to encode certificate", e))
}

/// `notAfter` of a DER certificate, in epoch seconds.
pub fn not_after(der: &[u8]) -> Result<u64, GatewayError> {
    let certificate =
        Certificate::from_der(der).map_err(|e| cert_error("Failed to parse certificate", e))?;
    Ok(certificate
        .tbs_certificate
        .validity
        .not_after
        .to_unix_duration()
        .as_secs())
}

/// DER `Name` of a certificate's subject.
pub fn subject(der: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let certificate =
        Certificate::from_der(der).map_err(|e| cert_error("Failed to parse certificate", e))?;
    certificate
        .tbs_certificate
        .subject
        .to_der()
        .map_err(|e| cert_error("Failed to encode subject", e))
}

/// Current time in epoch seconds.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn algorithm_identifier(
    algorithm: &SignatureAlgorithm,
) -> Result<AlgorithmIdentifierOwned, GatewayError> {
    let (oid, parameters) = match (algorithm.family(), algorithm.digest_bits()) {
        (AlgorithmFamily::Rsa, 256) => (SHA256_WITH_RSA, Some(Any::null())),
        (AlgorithmFamily::Rsa, 384) => (SHA384_WITH_RSA, Some(Any::null())),
        (AlgorithmFamily::Rsa, 512) => (SHA512_WITH_RSA, Some(Any::null())),
        (AlgorithmFamily::Ec, 256) => (ECDSA_WITH_SHA256, None),
        (AlgorithmFamily::Ec, 384) => (ECDSA_WITH_SHA384, None),
        (AlgorithmFamily::Ec, 512) => (ECDSA_WITH_SHA512, None),
        _ => return Err(GatewayError::UnsupportedAlgorithm(algorithm.name().to_string())),
    };
    Ok(AlgorithmIdentifierOwned { oid, parameters })
}

/// UTCTime through 2049, GeneralizedTime afterwards (RFC 5280 4.1.2.5).
fn to_time(epoch_seconds: u64) -> Result<Time, GatewayError> {
    let duration = Duration::from_secs(epoch_seconds);
    if let Ok(utc) = UtcTime::from_unix_duration(duration) {
        return Ok(Time::UtcTime(utc));
    }
    GeneralizedTime::from_unix_duration(duration)
        .map(Time::GeneralTime)
        .map_err(|e| cert_error("Validity out of range", e))
}

fn random_serial_number() -> Result<SerialNumber, GatewayError> {
    let mut bytes = *uuid::Uuid::new_v4().as_bytes();
    // Positive, and non-zero leading byte so the INTEGER stays 16 bytes
    bytes[0] = (bytes[0] & 0x7f) | 0x01;
    SerialNumber::new(&bytes).map_err(|e| cert_error("Invalid serial number", e))
}

/// Convert a fixed-size `r || s` ECDSA signature into its DER form.
fn ecdsa_signature_der(
    algorithm: &SignatureAlgorithm,
    raw: &[u8],
) -> Result<Vec<u8>, GatewayError> {
    let invalid = |e: p256::ecdsa::Error| cert_error("Invalid ECDSA signature", e);
    let der = match algorithm.curve() {
        Some(EcCurve::P256) => p256::ecdsa::Signature::from_slice(raw)
            .map_err(invalid)?
            .to_der()
            .as_bytes()
            .to_vec(),
        Some(EcCurve::P384) => p384::ecdsa::Signature::from_slice(raw)
            .map_err(invalid)?
            .to_der()
            .as_bytes()
            .to_vec(),
        Some(EcCurve::P521) => p521::ecdsa::Signature::from_slice(raw)
            .map_err(invalid)?
            .to_der()
            .as_bytes()
            .to_vec(),
        None => return Err(GatewayError::UnsupportedAlgorithm(algorithm.name().to_string())),
    };
    Ok(der)
}

fn cert_error(context: &str, e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Certificate(format!("{}: {}", context, e))
}
