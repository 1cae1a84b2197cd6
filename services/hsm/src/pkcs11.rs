//! PKCS#11 key store
//!
//! Keeps key pairs and their certificates on a PKCS#11 token (SoftHSM2 by
//! default). Every object belonging to a key shares the alias as its label
//! and id, and is looked up by label each time.

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, CertificateType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::{AuthPin, Ulong};
use der::Decode;
use der::asn1::OctetStringRef;
use eleven::algorithm::{AlgorithmFamily, EcCurve, SignatureAlgorithm};
use eleven::certificate::{self, CertificateRequest};
use eleven::gateway::{KeyStoreGateway, PublicKeyMaterial};
use eleven::{GatewayError, software};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

// DER-encoded named curve OIDs for CKA_EC_PARAMS
const P256_PARAMS: &str = "06082a8648ce3d030107";
const P384_PARAMS: &str = "06052b81040022";
const P521_PARAMS: &str = "06052b81040023";

const RSA_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

#[derive(Error, Debug)]
pub enum HsmError {
    #[error("PKCS#11 error: {0}")]
    Pkcs11(#[from] cryptoki::error::Error),
    #[error("No slot available")]
    NoSlotAvailable,
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Missing attribute {attribute} on {alias}")]
    MissingAttribute {
        alias: String,
        attribute: &'static str,
    },
    #[error("Unsupported key on token: {0}")]
    UnsupportedKey(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<HsmError> for GatewayError {
    fn from(e: HsmError) -> Self {
        match e {
            HsmError::KeyNotFound(alias) => GatewayError::KeyNotFound(alias),
            HsmError::SigningFailed(msg) => GatewayError::SigningFailed(msg),
            other => GatewayError::Store(other.to_string()),
        }
    }
}

/// Key store backed by a logged-in PKCS#11 session.
pub struct Pkcs11KeyStore {
    // Keeps the module loaded for the lifetime of the session
    _pkcs11: Pkcs11,
    session: Mutex<Session>,
    rsa_bits: usize,
}

impl Pkcs11KeyStore {
    /// Load the PKCS#11 module, open a read-write session on the slot and log in.
    pub fn new(
        library_path: &str,
        slot_index: usize,
        pin: &str,
        rsa_bits: usize,
    ) -> Result<Self, HsmError> {
        let pkcs11 = Pkcs11::new(library_path)?;
        pkcs11.initialize(CInitializeArgs::OsThreads)?;

        let slots = pkcs11.get_slots_with_token()?;
        let slot = slots
            .get(slot_index)
            .copied()
            .ok_or(HsmError::NoSlotAvailable)?;

        let session = pkcs11.open_rw_session(slot)?;
        session.login(UserType::User, Some(&AuthPin::new(pin.into())))?;

        Ok(Self {
            _pkcs11: pkcs11,
            session: Mutex::new(session),
            rsa_bits,
        })
    }

    fn session(&self, operation: &str) -> Result<MutexGuard<'_, Session>, HsmError> {
        self.session.lock().map_err(|_| {
            HsmError::InternalError(format!("Session lock poisoned during {}", operation))
        })
    }

    fn generate_key_pair(
        &self,
        session: &Session,
        alias: &str,
        algorithm: &SignatureAlgorithm,
    ) -> Result<(ObjectHandle, ObjectHandle), HsmError> {
        let label = alias.as_bytes().to_vec();

        let (mechanism, key_type, mut public_template) = match algorithm.curve() {
            None if algorithm.family() == AlgorithmFamily::Rsa => (
                Mechanism::RsaPkcsKeyPairGen,
                KeyType::RSA,
                vec![
                    Attribute::ModulusBits(Ulong::from(self.rsa_bits as u64)),
                    Attribute::PublicExponent(RSA_PUBLIC_EXPONENT.to_vec()),
                ],
            ),
            Some(curve) => (
                Mechanism::EccKeyPairGen,
                KeyType::EC,
                vec![Attribute::EcParams(ec_params(curve)?)],
            ),
            None => return Err(HsmError::UnsupportedKey(algorithm.name().to_string())),
        };

        public_template.extend([
            Attribute::Class(ObjectClass::PUBLIC_KEY),
            Attribute::KeyType(key_type),
            Attribute::Token(true),
            Attribute::Verify(true),
            Attribute::Label(label.clone()),
            Attribute::Id(label.clone()),
        ]);

        let private_template = vec![
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::KeyType(key_type),
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Sign(true),
            Attribute::Label(label.clone()),
            Attribute::Id(label),
        ];

        session
            .generate_key_pair(&mechanism, &public_template, &private_template)
            .map_err(Into::into)
    }

    /// Self-sign a certificate for the new key and store it next to the pair.
    fn store_certificate(
        &self,
        session: &Session,
        alias: &str,
        request: &CertificateRequest<'_>,
        private_key: ObjectHandle,
    ) -> Result<ObjectHandle, GatewayError> {
        let der = certificate::issue_self_signed(request, |tbs| {
            sign_with_handle(session, private_key, request.algorithm, tbs).map_err(Into::into)
        })?;
        let subject = certificate::subject(&der)?;

        let label = alias.as_bytes().to_vec();
        let template = vec![
            Attribute::Class(ObjectClass::CERTIFICATE),
            Attribute::CertificateType(CertificateType::X_509),
            Attribute::Token(true),
            Attribute::Label(label.clone()),
            Attribute::Id(label),
            Attribute::Subject(subject),
            Attribute::Value(der),
        ];
        session
            .create_object(&template)
            .map_err(|e| HsmError::from(e).into())
    }
}

impl KeyStoreGateway for Pkcs11KeyStore {
    fn generate(
        &self,
        subject: &str,
        algorithm: &'static SignatureAlgorithm,
        expires_at: u64,
    ) -> Result<String, GatewayError> {
        let alias = uuid::Uuid::new_v4().to_string();
        let session = self.session("key generation")?;

        let (public_key, private_key) = self.generate_key_pair(&session, &alias, algorithm)?;

        let stored = read_public_key(&session, &alias, public_key)
            .map_err(GatewayError::from)
            .and_then(|material| software::subject_public_key_info(&material))
            .and_then(|public_key_info| {
                let request = CertificateRequest {
                    subject,
                    public_key_info: &public_key_info,
                    algorithm,
                    not_before: certificate::now(),
                    not_after: expires_at,
                };
                self.store_certificate(&session, &alias, &request, private_key)
            });

        if let Err(e) = stored {
            // Never leave a key pair behind without its certificate
            for handle in [public_key, private_key] {
                if let Err(cleanup) = session.destroy_object(handle) {
                    warn!(alias = %alias, error = %cleanup, "Failed to remove partial key");
                }
            }
            return Err(e);
        }

        debug!(alias = %alias, algorithm = %algorithm, "Stored generated key on token");
        Ok(alias)
    }

    fn public_key(&self, alias: &str) -> Result<PublicKeyMaterial, GatewayError> {
        let session = self.session("public key retrieval")?;
        let handle = find_object(&session, alias, ObjectClass::PUBLIC_KEY)?;
        Ok(read_public_key(&session, alias, handle)?)
    }

    fn certificate_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>, GatewayError> {
        let session = self.session("certificate retrieval")?;
        let handle = find_object(&session, alias, ObjectClass::CERTIFICATE)?;
        let attrs = session
            .get_attributes(handle, &[AttributeType::Value])
            .map_err(HsmError::from)?;

        let der = attrs
            .into_iter()
            .find_map(|attr| match attr {
                Attribute::Value(bytes) => Some(bytes),
                _ => None,
            })
            .ok_or_else(|| HsmError::MissingAttribute {
                alias: alias.to_string(),
                attribute: "CKA_VALUE",
            })?;
        Ok(vec![der])
    }

    fn sign(
        &self,
        alias: &str,
        algorithm: &SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, GatewayError> {
        let session = self.session("signing")?;

        let public_key = find_object(&session, alias, ObjectClass::PUBLIC_KEY)?;
        if !read_public_key(&session, alias, public_key)?.supports(algorithm) {
            return Err(GatewayError::AlgorithmMismatch {
                alias: alias.to_string(),
                algorithm: algorithm.name().to_string(),
            });
        }

        let private_key = find_object(&session, alias, ObjectClass::PRIVATE_KEY)?;
        Ok(sign_with_handle(&session, private_key, algorithm, data)?)
    }

    fn delete(&self, alias: &str) -> Result<(), GatewayError> {
        let session = self.session("key deletion")?;
        let handles = session
            .find_objects(&[Attribute::Label(alias.as_bytes().to_vec())])
            .map_err(HsmError::from)?;

        for handle in handles {
            session.destroy_object(handle).map_err(HsmError::from)?;
        }
        Ok(())
    }
}

/// Find an object of `class` by label.
fn find_object(
    session: &Session,
    alias: &str,
    class: ObjectClass,
) -> Result<ObjectHandle, HsmError> {
    let template = vec![
        Attribute::Class(class),
        Attribute::Label(alias.as_bytes().to_vec()),
    ];

    let handles = session.find_objects(&template)?;
    handles
        .into_iter()
        .next()
        .ok_or_else(|| HsmError::KeyNotFound(alias.to_string()))
}

fn read_public_key(
    session: &Session,
    alias: &str,
    handle: ObjectHandle,
) -> Result<PublicKeyMaterial, HsmError> {
    let attrs = session.get_attributes(
        handle,
        &[
            AttributeType::KeyType,
            AttributeType::Modulus,
            AttributeType::PublicExponent,
            AttributeType::EcParams,
            AttributeType::EcPoint,
        ],
    )?;

    let mut key_type = None;
    let mut modulus = None;
    let mut exponent = None;
    let mut params = None;
    let mut point = None;
    for attr in attrs {
        match attr {
            Attribute::KeyType(kt) => key_type = Some(kt),
            Attribute::Modulus(bytes) => modulus = Some(bytes),
            Attribute::PublicExponent(bytes) => exponent = Some(bytes),
            Attribute::EcParams(bytes) => params = Some(bytes),
            Attribute::EcPoint(bytes) => point = Some(bytes),
            _ => {}
        }
    }

    let missing = |attribute| HsmError::MissingAttribute {
        alias: alias.to_string(),
        attribute,
    };

    match key_type {
        Some(KeyType::RSA) => Ok(PublicKeyMaterial::Rsa {
            modulus: modulus.ok_or_else(|| missing("CKA_MODULUS"))?,
            exponent: exponent.ok_or_else(|| missing("CKA_PUBLIC_EXPONENT"))?,
        }),
        Some(KeyType::EC) => {
            let curve = curve_from_params(&params.ok_or_else(|| missing("CKA_EC_PARAMS"))?)?;
            let point = unwrap_ec_point(curve, &point.ok_or_else(|| missing("CKA_EC_POINT"))?)?;
            let (x, y) = software::split_uncompressed_point(curve, &point)
                .map_err(|e| HsmError::UnsupportedKey(e.to_string()))?;
            Ok(PublicKeyMaterial::Ec { curve, x, y })
        }
        Some(other) => Err(HsmError::UnsupportedKey(format!("key type {}", other))),
        None => Err(missing("CKA_KEY_TYPE")),
    }
}

/// Sign with a private key handle.
///
/// RSA uses the token's combined hash-and-sign mechanisms. ECDSA hashes in
/// software and signs the digest with raw `CKM_ECDSA`, which SoftHSM2
/// supports for every curve; the result is already `r || s`.
fn sign_with_handle(
    session: &Session,
    private_key: ObjectHandle,
    algorithm: &SignatureAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>, HsmError> {
    let result = match (algorithm.family(), algorithm.digest_bits()) {
        (AlgorithmFamily::Rsa, 256) => session.sign(&Mechanism::Sha256RsaPkcs, private_key, data),
        (AlgorithmFamily::Rsa, 384) => session.sign(&Mechanism::Sha384RsaPkcs, private_key, data),
        (AlgorithmFamily::Rsa, 512) => session.sign(&Mechanism::Sha512RsaPkcs, private_key, data),
        (AlgorithmFamily::Ec, 256) => {
            session.sign(&Mechanism::Ecdsa, private_key, &Sha256::digest(data))
        }
        (AlgorithmFamily::Ec, 384) => {
            session.sign(&Mechanism::Ecdsa, private_key, &Sha384::digest(data))
        }
        (AlgorithmFamily::Ec, 512) => {
            session.sign(&Mechanism::Ecdsa, private_key, &Sha512::digest(data))
        }
        _ => {
            return Err(HsmError::SigningFailed(format!(
                "{} cannot be used with a token key",
                algorithm
            )));
        }
    };
    result.map_err(|e| HsmError::SigningFailed(e.to_string()))
}

fn ec_params(curve: EcCurve) -> Result<Vec<u8>, HsmError> {
    let encoded = match curve {
        EcCurve::P256 => P256_PARAMS,
        EcCurve::P384 => P384_PARAMS,
        EcCurve::P521 => P521_PARAMS,
    };
    hex::decode(encoded).map_err(|e| HsmError::InternalError(format!("Invalid EC params: {}", e)))
}

fn curve_from_params(params: &[u8]) -> Result<EcCurve, HsmError> {
    let encoded = hex::encode(params);
    match encoded.as_str() {
        P256_PARAMS => Ok(EcCurve::P256),
        P384_PARAMS => Ok(EcCurve::P384),
        P521_PARAMS => Ok(EcCurve::P521),
        _ => Err(HsmError::UnsupportedKey(format!("EC params {}", encoded))),
    }
}

/// CKA_EC_POINT is normally a DER OCTET STRING around the SEC1 point; some
/// tokens return the bare point.
fn unwrap_ec_point(curve: EcCurve, ec_point: &[u8]) -> Result<Vec<u8>, HsmError> {
    let raw_len = 1 + 2 * curve.field_size();
    if ec_point.len() == raw_len && ec_point[0] == 0x04 {
        return Ok(ec_point.to_vec());
    }
    OctetStringRef::from_der(ec_point)
        .map(|octets| octets.as_bytes().to_vec())
        .map_err(|e| HsmError::UnsupportedKey(format!("Unexpected EC point encoding: {}", e)))
}
