//! Ed25519 keypair generation, validation, and key-source resolution.
//!
//! All entity keys in keel are fixed-size Ed25519 keypairs carried as PKCS#8
//! PEM (private) and SPKI PEM (public). The key-manager API keeps an explicit
//! `bits` parameter so callers state the size they expect; anything other
//! than the fixed Ed25519 size is rejected.

use std::path::Path;

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey,
};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// The only supported key size, in bits.
pub const OBJECT_KEY_BITS: u32 = 256;

/// Token (case-insensitive) directing the key manager to generate a fresh
/// keypair. An empty token means the same thing.
pub const AUTO_KEY_TOKEN: &str = "auto";

/// Errors produced by keypair generation, validation, and loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The requested or supplied key size is not the fixed Ed25519 size.
    #[error("key has {got} bits; expected {expected} bits")]
    WrongKeySize {
        /// Expected size in bits.
        expected: u32,
        /// Requested or detected size in bits.
        got: u32,
    },

    /// The PEM document could not be parsed as an Ed25519 key.
    #[error("failed to parse {kind} key: {reason}")]
    InvalidPem {
        /// "private" or "public".
        kind: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A key file could not be read.
    #[error("failed to read key file {path}: {source}")]
    Io {
        /// The path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A generated key could not be encoded to PEM.
    #[error("failed to encode key: {reason}")]
    Encode {
        /// Human-readable reason.
        reason: String,
    },
}

/// A resolved keypair: the public half always, the private half when the
/// source carried or generated one.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// SPKI PEM encoding of the public key.
    pub public_pem: String,
    /// PKCS#8 PEM encoding of the private key, when available.
    pub private_pem: Option<String>,
    /// Whether the pair was freshly generated (and so must be persisted on
    /// commit).
    pub generated: bool,
}

/// Generates a fresh Ed25519 keypair.
///
/// # Errors
///
/// Returns [`KeyError::WrongKeySize`] if `bits` is not [`OBJECT_KEY_BITS`],
/// or [`KeyError::Encode`] if PEM encoding fails.
pub fn generate_keypair(bits: u32) -> Result<(String, String), KeyError> {
    if bits != OBJECT_KEY_BITS {
        return Err(KeyError::WrongKeySize {
            expected: OBJECT_KEY_BITS,
            got: bits,
        });
    }
    let signing = SigningKey::generate(&mut OsRng);
    let private_pem = signing
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeyError::Encode {
            reason: e.to_string(),
        })?
        .to_string();
    let public_pem = public_key_pem(&signing)?;
    Ok((public_pem, private_pem))
}

/// Parses and validates a PKCS#8 PEM private key of the expected size.
///
/// # Errors
///
/// Returns [`KeyError::WrongKeySize`] if `expected_bits` is not the fixed
/// Ed25519 size, or [`KeyError::InvalidPem`] if the document does not parse.
pub fn validate_private_key(pem: &str, expected_bits: u32) -> Result<SigningKey, KeyError> {
    if expected_bits != OBJECT_KEY_BITS {
        return Err(KeyError::WrongKeySize {
            expected: OBJECT_KEY_BITS,
            got: expected_bits,
        });
    }
    SigningKey::from_pkcs8_pem(pem).map_err(|e| KeyError::InvalidPem {
        kind: "private",
        reason: e.to_string(),
    })
}

/// Parses an SPKI PEM public key.
///
/// # Errors
///
/// Returns [`KeyError::InvalidPem`] if the document does not parse.
pub fn parse_public_key(pem: &str) -> Result<VerifyingKey, KeyError> {
    VerifyingKey::from_public_key_pem(pem).map_err(|e| KeyError::InvalidPem {
        kind: "public",
        reason: e.to_string(),
    })
}

/// Returns the SPKI PEM encoding of a signing key's public half.
///
/// # Errors
///
/// Returns [`KeyError::Encode`] if PEM encoding fails.
pub fn public_key_pem(signing: &SigningKey) -> Result<String, KeyError> {
    signing
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeyError::Encode {
            reason: e.to_string(),
        })
}

/// Resolves a key token into key material.
///
/// The token is interpreted as, in order:
/// - the auto-generate directive (`"auto"`, any case, or empty) — a fresh
///   pair is generated;
/// - a PEM literal — a private-key document yields the full pair, a
///   public-key document yields the public half only;
/// - a filesystem path to a PKCS#8 PEM private key.
///
/// # Errors
///
/// Returns [`KeyError::WrongKeySize`] for a bad `bits` value,
/// [`KeyError::Io`] if a path cannot be read, or [`KeyError::InvalidPem`] if
/// the resolved document does not parse as a key.
pub fn parse_or_generate(token: &str, bits: u32) -> Result<KeyMaterial, KeyError> {
    if bits != OBJECT_KEY_BITS {
        return Err(KeyError::WrongKeySize {
            expected: OBJECT_KEY_BITS,
            got: bits,
        });
    }

    let trimmed = token.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(AUTO_KEY_TOKEN) {
        let (public_pem, private_pem) = generate_keypair(bits)?;
        return Ok(KeyMaterial {
            public_pem,
            private_pem: Some(private_pem),
            generated: true,
        });
    }

    if trimmed.starts_with("-----BEGIN") {
        if let Ok(signing) = SigningKey::from_pkcs8_pem(trimmed) {
            return Ok(KeyMaterial {
                public_pem: public_key_pem(&signing)?,
                private_pem: Some(trimmed.to_string()),
                generated: false,
            });
        }
        let public = parse_public_key(trimmed)?;
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encode {
                reason: e.to_string(),
            })?;
        return Ok(KeyMaterial {
            public_pem,
            private_pem: None,
            generated: false,
        });
    }

    // Anything else is a path to a private key on disk.
    let path = Path::new(trimmed);
    let pem = std::fs::read_to_string(path).map_err(|source| KeyError::Io {
        path: trimmed.to_string(),
        source,
    })?;
    let signing = validate_private_key(&pem, bits)?;
    Ok(KeyMaterial {
        public_pem: public_key_pem(&signing)?,
        private_pem: Some(pem),
        generated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_keypairs() {
        let (pub_a, priv_a) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let (pub_b, priv_b) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        assert_ne!(pub_a, pub_b);
        assert_ne!(priv_a, priv_b);
        assert!(pub_a.contains("BEGIN PUBLIC KEY"));
        assert!(priv_a.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn rejects_wrong_bit_size() {
        assert!(matches!(
            generate_keypair(4096).unwrap_err(),
            KeyError::WrongKeySize {
                expected: 256,
                got: 4096
            }
        ));
        assert!(matches!(
            validate_private_key("irrelevant", 512).unwrap_err(),
            KeyError::WrongKeySize { .. }
        ));
    }

    #[test]
    fn validates_round_tripped_private_key() {
        let (_, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let signing = validate_private_key(&private_pem, OBJECT_KEY_BITS).unwrap();
        let re_encoded = public_key_pem(&signing).unwrap();
        assert!(re_encoded.contains("BEGIN PUBLIC KEY"));
    }

    #[test]
    fn auto_token_generates_a_full_pair() {
        for token in ["auto", "AUTO", ""] {
            let material = parse_or_generate(token, OBJECT_KEY_BITS).unwrap();
            assert!(material.generated);
            assert!(material.private_pem.is_some());
        }
    }

    #[test]
    fn pem_literal_private_key_is_accepted_in_place() {
        let (public_pem, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let material = parse_or_generate(&private_pem, OBJECT_KEY_BITS).unwrap();
        assert!(!material.generated);
        assert_eq!(material.public_pem, public_pem);
        assert_eq!(material.private_pem.as_deref(), Some(private_pem.as_str()));
    }

    #[test]
    fn pem_literal_public_key_yields_public_half_only() {
        let (public_pem, _) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let material = parse_or_generate(&public_pem, OBJECT_KEY_BITS).unwrap();
        assert!(material.private_pem.is_none());
        assert_eq!(material.public_pem, public_pem);
    }

    #[test]
    fn path_token_loads_a_key_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("owner.pem");
        let (public_pem, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        std::fs::write(&key_path, &private_pem).unwrap();

        let material =
            parse_or_generate(key_path.to_str().unwrap(), OBJECT_KEY_BITS).unwrap();
        assert_eq!(material.public_pem, public_pem);

        let missing = dir.path().join("missing.pem");
        assert!(matches!(
            parse_or_generate(missing.to_str().unwrap(), OBJECT_KEY_BITS).unwrap_err(),
            KeyError::Io { .. }
        ));
    }
}
