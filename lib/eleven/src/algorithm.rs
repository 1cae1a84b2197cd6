//! Signature Algorithm Catalog
//!
//! Fixed registry of the signature algorithms the service understands.
//! Algorithms are looked up by their JWA wire name and never constructed
//! at runtime.

use std::fmt;

/// Algorithm family, which decides the key shape and the validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmFamily {
    None,
    Hmac,
    Rsa,
    Ec,
}

impl AlgorithmFamily {
    /// Wire value used for the JWK `kty` member.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmFamily::None => "none",
            AlgorithmFamily::Hmac => "HMAC",
            AlgorithmFamily::Rsa => "RSA",
            AlgorithmFamily::Ec => "EC",
        }
    }

    /// Whether keys of this family are generated as a key pair in the store.
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, AlgorithmFamily::Rsa | AlgorithmFamily::Ec)
    }
}

impl fmt::Display for AlgorithmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NIST curves supported for ECDSA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    pub fn name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(EcCurve::P256),
            "P-384" => Some(EcCurve::P384),
            "P-521" => Some(EcCurve::P521),
            _ => None,
        }
    }

    /// Size in bytes of a field element (and of each affine coordinate).
    pub fn field_size(&self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A supported signature algorithm.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SignatureAlgorithm {
    name: &'static str,
    family: AlgorithmFamily,
    curve: Option<EcCurve>,
    digest_bits: u16,
}

impl SignatureAlgorithm {
    const fn new(
        name: &'static str,
        family: AlgorithmFamily,
        curve: Option<EcCurve>,
        digest_bits: u16,
    ) -> Self {
        Self {
            name,
            family,
            curve,
            digest_bits,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn family(&self) -> AlgorithmFamily {
        self.family
    }

    /// Curve for EC algorithms, `None` for every other family.
    pub fn curve(&self) -> Option<EcCurve> {
        self.curve
    }

    pub fn digest_bits(&self) -> u16 {
        self.digest_bits
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub static NONE: SignatureAlgorithm =
    SignatureAlgorithm::new("none", AlgorithmFamily::None, None, 0);
pub static HS256: SignatureAlgorithm =
    SignatureAlgorithm::new("HS256", AlgorithmFamily::Hmac, None, 256);
pub static HS384: SignatureAlgorithm =
    SignatureAlgorithm::new("HS384", AlgorithmFamily::Hmac, None, 384);
pub static HS512: SignatureAlgorithm =
    SignatureAlgorithm::new("HS512", AlgorithmFamily::Hmac, None, 512);
pub static RS256: SignatureAlgorithm =
    SignatureAlgorithm::new("RS256", AlgorithmFamily::Rsa, None, 256);
pub static RS384: SignatureAlgorithm =
    SignatureAlgorithm::new("RS384", AlgorithmFamily::Rsa, None, 384);
pub static RS512: SignatureAlgorithm =
    SignatureAlgorithm::new("RS512", AlgorithmFamily::Rsa, None, 512);
pub static ES256: SignatureAlgorithm =
    SignatureAlgorithm::new("ES256", AlgorithmFamily::Ec, Some(EcCurve::P256), 256);
pub static ES384: SignatureAlgorithm =
    SignatureAlgorithm::new("ES384", AlgorithmFamily::Ec, Some(EcCurve::P384), 384);
pub static ES512: SignatureAlgorithm =
    SignatureAlgorithm::new("ES512", AlgorithmFamily::Ec, Some(EcCurve::P521), 512);

/// Every algorithm in the catalog.
pub static ALGORITHMS: [&SignatureAlgorithm; 10] = [
    &NONE, &HS256, &HS384, &HS512, &RS256, &RS384, &RS512, &ES256, &ES384, &ES512,
];

/// Resolve an algorithm by its exact, case-sensitive wire name.
pub fn resolve(name: &str) -> Option<&'static SignatureAlgorithm> {
    ALGORITHMS.iter().copied().find(|alg| alg.name == name)
}
