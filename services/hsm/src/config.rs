//! Service configuration read from the environment at startup.

use eleven::SigningInputPolicy;
use eleven::memory::DEFAULT_RSA_KEY_BITS;
use thiserror::Error;

const DEFAULT_PORT: u16 = 80;
const DEFAULT_LIBRARY: &str = "/usr/lib/softhsm/libsofthsm2.so";
const DEFAULT_PIN: &str = "1234";
const DEFAULT_SUBJECT: &str = "CN=Eleven";
const MIN_RSA_KEY_BITS: usize = 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a valid number: {value}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("KEY_STORE must be 'pkcs11' or 'memory', got '{0}'")]
    UnknownKeyStore(String),
    #[error("SIGNING_INPUT_POLICY must be 'any' or 'jws', got '{0}'")]
    UnknownSigningInputPolicy(String),
    #[error("RSA_KEY_BITS must be a multiple of 8 and at least {MIN_RSA_KEY_BITS}, got {0}")]
    RsaKeyBits(usize),
    #[error("DN_NAME must not be empty")]
    EmptySubject,
}

/// Where private keys live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreBackend {
    Pkcs11 {
        library_path: String,
        slot_index: usize,
        pin: String,
    },
    /// Process-local keys, lost on restart.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub port: u16,
    pub backend: KeyStoreBackend,
    /// Distinguished name used as subject and issuer of generated certificates.
    pub subject_name: String,
    pub rsa_key_bits: usize,
    pub signing_input_policy: SigningInputPolicy,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_number(&lookup, "PORT", DEFAULT_PORT)?;

        let backend = match lookup("KEY_STORE").as_deref().unwrap_or("pkcs11") {
            "pkcs11" => KeyStoreBackend::Pkcs11 {
                library_path: lookup("SOFTHSM2_LIBRARY")
                    .unwrap_or_else(|| DEFAULT_LIBRARY.to_string()),
                slot_index: parse_number(&lookup, "HSM_SLOT", 0)?,
                pin: lookup("HSM_PIN").unwrap_or_else(|| DEFAULT_PIN.to_string()),
            },
            "memory" => KeyStoreBackend::Memory,
            other => return Err(ConfigError::UnknownKeyStore(other.to_string())),
        };

        let subject_name = lookup("DN_NAME").unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        if subject_name.trim().is_empty() {
            return Err(ConfigError::EmptySubject);
        }

        let rsa_key_bits = parse_number(&lookup, "RSA_KEY_BITS", DEFAULT_RSA_KEY_BITS)?;
        if rsa_key_bits < MIN_RSA_KEY_BITS || rsa_key_bits % 8 != 0 {
            return Err(ConfigError::RsaKeyBits(rsa_key_bits));
        }

        let signing_input_policy = match lookup("SIGNING_INPUT_POLICY") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::UnknownSigningInputPolicy(value))?,
            None => SigningInputPolicy::default(),
        };

        Ok(Self {
            port,
            backend,
            subject_name,
            rsa_key_bits,
            signing_input_policy,
        })
    }
}

fn parse_number<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|var| vars.get(var).cloned())
    }

    // ==================== Defaults ====================

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 80);
        assert_eq!(
            config.backend,
            KeyStoreBackend::Pkcs11 {
                library_path: "/usr/lib/softhsm/libsofthsm2.so".to_string(),
                slot_index: 0,
                pin: "1234".to_string(),
            }
        );
        assert_eq!(config.subject_name, "CN=Eleven");
        assert_eq!(config.rsa_key_bits, 2048);
        assert_eq!(config.signing_input_policy, SigningInputPolicy::AnyNonEmpty);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("KEY_STORE", "memory"),
            ("DN_NAME", "CN=Signer,O=Example"),
            ("RSA_KEY_BITS", "3072"),
            ("SIGNING_INPUT_POLICY", "jws"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.backend, KeyStoreBackend::Memory);
        assert_eq!(config.subject_name, "CN=Signer,O=Example");
        assert_eq!(config.rsa_key_bits, 3072);
        assert_eq!(config.signing_input_policy, SigningInputPolicy::JwsCompact);
    }

    // ==================== Errors ====================

    #[test]
    fn test_invalid_port() {
        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(err.to_string(), "PORT must be a valid number: eighty");
    }

    #[test]
    fn test_invalid_slot() {
        let err = config(&[("HSM_SLOT", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { var: "HSM_SLOT", .. }));
    }

    #[test]
    fn test_unknown_key_store() {
        let err = config(&[("KEY_STORE", "vault")]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownKeyStore("vault".to_string()));
    }

    #[test]
    fn test_unknown_policy() {
        let err = config(&[("SIGNING_INPUT_POLICY", "strict")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownSigningInputPolicy("strict".to_string())
        );
    }

    #[test]
    fn test_rsa_key_bits_bounds() {
        assert_eq!(
            config(&[("RSA_KEY_BITS", "512")]).unwrap_err(),
            ConfigError::RsaKeyBits(512)
        );
        assert_eq!(
            config(&[("RSA_KEY_BITS", "2047")]).unwrap_err(),
            ConfigError::RsaKeyBits(2047)
        );
    }

    #[test]
    fn test_empty_subject() {
        assert_eq!(
            config(&[("DN_NAME", " ")]).unwrap_err(),
            ConfigError::EmptySubject
        );
    }
}
