//! Deterministic Ed25519 signatures over canonical bytes.
//!
//! Signatures are computed over the SHA-256 digest of the canonical
//! encoding of a record with its `signature` field cleared, then
//! base64-encoded for embedding back into the record. Ed25519 is
//! deterministic and salt-free, so any valid signer/verifier pairing
//! reproduces the verification result offline.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _};
use thiserror::Error;

use super::hash::sha256;
use super::keys::{parse_public_key, KeyError};

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Errors produced while parsing or verifying signatures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignatureError {
    /// The signature field is not valid base64.
    #[error("signature is not valid base64: {reason}")]
    InvalidEncoding {
        /// Human-readable reason.
        reason: String,
    },

    /// The decoded signature has the wrong length.
    #[error("invalid signature length: expected {expected}, got {got}")]
    InvalidLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        got: usize,
    },

    /// The verifying key could not be parsed.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Cryptographic verification failed.
    #[error("signature verification failed")]
    VerificationFailed,
}

/// Signs `bytes` (digest-then-sign) and returns the base64 signature.
#[must_use]
pub fn sign_bytes_b64(signing: &SigningKey, bytes: &[u8]) -> String {
    let digest = sha256(bytes);
    let signature = signing.sign(&digest);
    BASE64.encode(signature.to_bytes())
}

/// Decodes a base64 signature, enforcing the Ed25519 length.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidEncoding`] or
/// [`SignatureError::InvalidLength`] for malformed input.
pub fn parse_signature_b64(sig_b64: &str) -> Result<Signature, SignatureError> {
    let raw = BASE64
        .decode(sig_b64)
        .map_err(|e| SignatureError::InvalidEncoding {
            reason: e.to_string(),
        })?;
    let bytes: [u8; SIGNATURE_SIZE] =
        raw.as_slice()
            .try_into()
            .map_err(|_| SignatureError::InvalidLength {
                expected: SIGNATURE_SIZE,
                got: raw.len(),
            })?;
    Ok(Signature::from_bytes(&bytes))
}

/// Verifies a base64 signature over `bytes` against an SPKI PEM public key.
///
/// # Errors
///
/// Returns [`SignatureError::Key`] if the public key does not parse, a
/// decoding error for malformed signatures, or
/// [`SignatureError::VerificationFailed`] if the signature does not verify.
pub fn verify_bytes_b64(
    public_pem: &str,
    bytes: &[u8],
    sig_b64: &str,
) -> Result<(), SignatureError> {
    let verifying = parse_public_key(public_pem)?;
    let signature = parse_signature_b64(sig_b64)?;
    let digest = sha256(bytes);
    verifying
        .verify(&digest, &signature)
        .map_err(|_| SignatureError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::super::keys::{generate_keypair, validate_private_key, OBJECT_KEY_BITS};
    use super::*;

    fn test_keypair() -> (String, SigningKey) {
        let (public_pem, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let signing = validate_private_key(&private_pem, OBJECT_KEY_BITS).unwrap();
        (public_pem, signing)
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (public_pem, signing) = test_keypair();
        let sig = sign_bytes_b64(&signing, b"payload");
        verify_bytes_b64(&public_pem, b"payload", &sig).unwrap();
    }

    #[test]
    fn signing_is_deterministic() {
        let (_, signing) = test_keypair();
        assert_eq!(
            sign_bytes_b64(&signing, b"payload"),
            sign_bytes_b64(&signing, b"payload")
        );
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (public_pem, signing) = test_keypair();
        let sig = sign_bytes_b64(&signing, b"payload");
        assert!(matches!(
            verify_bytes_b64(&public_pem, b"payload!", &sig).unwrap_err(),
            SignatureError::VerificationFailed
        ));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let (_, signing) = test_keypair();
        let (other_public, _) = test_keypair();
        let sig = sign_bytes_b64(&signing, b"payload");
        assert!(matches!(
            verify_bytes_b64(&other_public, b"payload", &sig).unwrap_err(),
            SignatureError::VerificationFailed
        ));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        assert!(matches!(
            parse_signature_b64("not//valid==").unwrap_err(),
            SignatureError::InvalidLength { .. } | SignatureError::InvalidEncoding { .. }
        ));
        assert!(matches!(
            parse_signature_b64("####").unwrap_err(),
            SignatureError::InvalidEncoding { .. }
        ));
    }
}
