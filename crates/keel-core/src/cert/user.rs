//! User certificates.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::canonical::{to_canonical_bytes, CanonicalError};
use crate::crypto::{sign_bytes_b64, verify_bytes_b64, SignatureError};

/// Certificate binding a user account to its public key and account limits.
///
/// Issued by an administrator on account creation and credential reset;
/// re-issued by the user themselves for other updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCertificate {
    /// Random 63-bit account id, assigned once at creation.
    pub user_id: u64,
    /// Unique account email.
    pub email: String,
    /// SPKI PEM public key, or the `"unset"` sentinel.
    pub public_key: String,
    /// Id of the administrator that issued the certificate.
    pub admin_id: u64,
    /// Whether the account itself holds administrator rights.
    pub is_admin: bool,
    /// Maximum number of volumes the account may own.
    pub max_volumes: u32,
    /// Maximum number of gateways the account may own.
    pub max_gateways: u32,
    /// Base64 Ed25519 signature over the canonical record with this field
    /// cleared.
    pub signature: String,
}

impl UserCertificate {
    /// Canonical bytes of the record with the signature cleared.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the record cannot be canonicalized.
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        to_canonical_bytes(&unsigned)
    }

    /// Signs the certificate in place with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the record cannot be canonicalized.
    pub fn sign_with(&mut self, key: &SigningKey) -> Result<(), CanonicalError> {
        let bytes = self.unsigned_bytes()?;
        self.signature = sign_bytes_b64(key, &bytes);
        Ok(())
    }

    /// Verifies the embedded signature against an SPKI PEM public key.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] if the signature is malformed or does not
    /// verify.
    pub fn verify(&self, public_pem: &str) -> Result<(), SignatureError> {
        let bytes = self
            .unsigned_bytes()
            .map_err(|e| SignatureError::InvalidEncoding {
                reason: e.to_string(),
            })?;
        verify_bytes_b64(public_pem, &bytes, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::super::PUBLIC_KEY_UNSET;
    use super::*;
    use crate::crypto::{generate_keypair, validate_private_key, OBJECT_KEY_BITS};

    fn sample_cert() -> UserCertificate {
        UserCertificate {
            user_id: 77,
            email: "alice@example.com".to_string(),
            public_key: PUBLIC_KEY_UNSET.to_string(),
            admin_id: 1,
            is_admin: false,
            max_volumes: 10,
            max_gateways: 10,
            signature: String::new(),
        }
    }

    #[test]
    fn sign_then_verify() {
        let (public_pem, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let key = validate_private_key(&private_pem, OBJECT_KEY_BITS).unwrap();

        let mut cert = sample_cert();
        cert.sign_with(&key).unwrap();
        assert!(!cert.signature.is_empty());
        cert.verify(&public_pem).unwrap();
    }

    #[test]
    fn mutation_invalidates_signature() {
        let (public_pem, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let key = validate_private_key(&private_pem, OBJECT_KEY_BITS).unwrap();

        let mut cert = sample_cert();
        cert.sign_with(&key).unwrap();
        cert.max_volumes = 100;
        assert!(cert.verify(&public_pem).is_err());
    }

    #[test]
    fn unsigned_bytes_ignore_existing_signature() {
        let mut a = sample_cert();
        let mut b = sample_cert();
        a.signature = "AAAA".to_string();
        b.signature = "BBBB".to_string();
        assert_eq!(a.unsigned_bytes().unwrap(), b.unsigned_bytes().unwrap());
    }
}
