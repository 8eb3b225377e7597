//! Sealing of driver secrets for delivery to a gateway.
//!
//! A driver's `secrets` map is sealed so that only the gateway that owns the
//! keypair can recover it, while anyone can verify who sealed it:
//!
//! 1. a fixed-name padding field holding 256 bytes of base64 randomness is
//!    injected, so short plaintexts reveal nothing about their size;
//! 2. the augmented map is canonically serialized;
//! 3. the bytes are encrypted with AES-256-GCM under a key derived from the
//!    gateway's Ed25519 secret via HKDF-SHA-256;
//! 4. the envelope (ciphertext, nonce, gateway public key) is signed with the
//!    gateway key and base64-encoded.
//!
//! Unsealing verifies the envelope signature, decrypts, and strips the
//! padding field.

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::canonical::{to_canonical_bytes, CanonicalError};
use crate::crypto::{
    public_key_pem, sign_bytes_b64, validate_private_key, verify_bytes_b64, KeyError,
    SignatureError, OBJECT_KEY_BITS,
};

/// Name of the injected padding field.
pub const SECRETS_PAD_FIELD: &str = "__keel_pad__";

/// Number of random padding bytes injected before sealing.
pub const SECRETS_PAD_BYTES: usize = 256;

/// HKDF info string binding the derived key to this use.
const SEAL_KDF_INFO: &[u8] = b"keel:driver-secrets:v1";

/// AES-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// Errors from sealing and unsealing secrets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SealError {
    /// The gateway key failed validation.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The secrets map could not be canonicalized.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// The envelope signature is missing or wrong.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// AEAD encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// AEAD decryption failed (wrong keypair or tampered ciphertext).
    #[error("decryption failed")]
    Decrypt,

    /// The sealed payload is structurally malformed.
    #[error("malformed sealed payload: {reason}")]
    Malformed {
        /// Human-readable reason.
        reason: String,
    },
}

/// Signed envelope carrying sealed secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEnvelope {
    /// Base64 AES-256-GCM ciphertext.
    ciphertext: String,
    /// Base64 GCM nonce.
    nonce: String,
    /// SPKI PEM public key of the sealing gateway.
    public_key: String,
    /// Base64 Ed25519 signature over the canonical envelope with this field
    /// cleared.
    signature: String,
}

impl SealedEnvelope {
    fn unsigned_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        to_canonical_bytes(&unsigned)
    }
}

/// Derives the AEAD key from the gateway's Ed25519 secret.
fn derive_seal_key(secret: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, secret);
    let mut okm = [0u8; 32];
    // 32 bytes is always a valid HKDF-SHA256 output length.
    #[allow(clippy::expect_used)]
    hk.expand(SEAL_KDF_INFO, &mut okm)
        .expect("32-byte HKDF output");
    okm
}

/// Seals a secrets map under the gateway's keypair.
///
/// Returns the base64-encoded signed envelope.
///
/// # Errors
///
/// Returns [`SealError::Key`] for bad key material,
/// [`SealError::Canonical`] if the map cannot be serialized, or
/// [`SealError::Encrypt`] on cipher failure.
pub fn seal_secrets(
    secrets: &BTreeMap<String, String>,
    gateway_private_pem: &str,
) -> Result<String, SealError> {
    let signing = validate_private_key(gateway_private_pem, OBJECT_KEY_BITS)?;

    let mut padded = secrets.clone();
    let mut pad = [0u8; SECRETS_PAD_BYTES];
    OsRng.fill_bytes(&mut pad);
    padded.insert(SECRETS_PAD_FIELD.to_string(), BASE64.encode(pad));

    let plaintext = to_canonical_bytes(&padded)?;

    let key = derive_seal_key(&signing.to_bytes());
    let cipher = Aes256Gcm::new(&key.into());
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| SealError::Encrypt)?;

    let mut envelope = SealedEnvelope {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce),
        public_key: public_key_pem(&signing)?,
        signature: String::new(),
    };
    envelope.signature = sign_bytes_b64(&signing, &envelope.unsigned_bytes()?);

    Ok(BASE64.encode(to_canonical_bytes(&envelope)?))
}

/// Verifies the authenticity of a sealed payload without decrypting it.
///
/// Returns the SPKI PEM public key that sealed it.
///
/// # Errors
///
/// Returns [`SealError::Malformed`] for undecodable payloads or
/// [`SealError::Signature`] if the envelope signature does not verify.
pub fn verify_sealed(sealed_b64: &str) -> Result<String, SealError> {
    let envelope = decode_envelope(sealed_b64)?;
    verify_bytes_b64(
        &envelope.public_key,
        &envelope.unsigned_bytes()?,
        &envelope.signature,
    )?;
    Ok(envelope.public_key)
}

/// Unseals a payload with the gateway's private key, returning the original
/// secrets map with the padding field removed.
///
/// # Errors
///
/// Returns [`SealError::Signature`] if the envelope signature does not
/// verify, [`SealError::Decrypt`] if the keypair does not match or the
/// ciphertext was tampered with, or [`SealError::Malformed`] for
/// undecodable payloads.
pub fn unseal_secrets(
    sealed_b64: &str,
    gateway_private_pem: &str,
) -> Result<BTreeMap<String, String>, SealError> {
    let signing = validate_private_key(gateway_private_pem, OBJECT_KEY_BITS)?;
    let envelope = decode_envelope(sealed_b64)?;
    verify_bytes_b64(
        &envelope.public_key,
        &envelope.unsigned_bytes()?,
        &envelope.signature,
    )?;

    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| SealError::Malformed {
            reason: e.to_string(),
        })?;
    let nonce = BASE64
        .decode(&envelope.nonce)
        .map_err(|e| SealError::Malformed {
            reason: e.to_string(),
        })?;
    if nonce.len() != NONCE_SIZE {
        return Err(SealError::Malformed {
            reason: format!("nonce has {} bytes; expected {NONCE_SIZE}", nonce.len()),
        });
    }

    let key = derive_seal_key(&signing.to_bytes());
    let cipher = Aes256Gcm::new(&key.into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| SealError::Decrypt)?;

    let mut secrets: BTreeMap<String, String> =
        serde_json::from_slice(&plaintext).map_err(|e| SealError::Malformed {
            reason: e.to_string(),
        })?;
    secrets.remove(SECRETS_PAD_FIELD);
    Ok(secrets)
}

fn decode_envelope(sealed_b64: &str) -> Result<SealedEnvelope, SealError> {
    let raw = BASE64
        .decode(sealed_b64.trim())
        .map_err(|e| SealError::Malformed {
            reason: e.to_string(),
        })?;
    serde_json::from_slice(&raw).map_err(|e| SealError::Malformed {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;

    fn sample_secrets() -> BTreeMap<String, String> {
        let mut secrets = BTreeMap::new();
        secrets.insert("api_token".to_string(), "hunter2".to_string());
        secrets.insert("region".to_string(), "eu-west".to_string());
        secrets
    }

    #[test]
    fn seal_unseal_round_trip_strips_padding() {
        let (_, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let secrets = sample_secrets();

        let sealed = seal_secrets(&secrets, &private_pem).unwrap();
        let opened = unseal_secrets(&sealed, &private_pem).unwrap();
        assert_eq!(opened, secrets);
        assert!(!opened.contains_key(SECRETS_PAD_FIELD));
    }

    #[test]
    fn wrong_keypair_cannot_unseal() {
        let (_, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let (_, other_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();

        let sealed = seal_secrets(&sample_secrets(), &private_pem).unwrap();
        assert!(matches!(
            unseal_secrets(&sealed, &other_pem).unwrap_err(),
            SealError::Decrypt
        ));
    }

    #[test]
    fn authenticity_is_verifiable_without_the_private_key() {
        let (public_pem, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let sealed = seal_secrets(&sample_secrets(), &private_pem).unwrap();
        assert_eq!(verify_sealed(&sealed).unwrap(), public_pem);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let (_, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let sealed = seal_secrets(&sample_secrets(), &private_pem).unwrap();

        let raw = BASE64.decode(&sealed).unwrap();
        let mut envelope: SealedEnvelope = serde_json::from_slice(&raw).unwrap();
        let mut ct = BASE64.decode(&envelope.ciphertext).unwrap();
        ct[0] ^= 0xFF;
        envelope.ciphertext = BASE64.encode(ct);
        let tampered = BASE64.encode(to_canonical_bytes(&envelope).unwrap());

        // The envelope signature no longer matches.
        assert!(matches!(
            unseal_secrets(&tampered, &private_pem).unwrap_err(),
            SealError::Signature(_)
        ));
    }

    #[test]
    fn sealed_payloads_differ_across_calls() {
        // Random padding and nonce must make identical plaintexts seal
        // differently.
        let (_, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let a = seal_secrets(&sample_secrets(), &private_pem).unwrap();
        let b = seal_secrets(&sample_secrets(), &private_pem).unwrap();
        assert_ne!(a, b);
    }
}
