//! Gateway certificates.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::canonical::{to_canonical_bytes, CanonicalError};
use crate::crypto::{sign_bytes_b64, verify_bytes_b64, SignatureError};

/// Certificate authorizing a gateway process to act within a volume.
///
/// `version` strictly increases on every update; `gateway_id` and
/// `volume_id` are immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCertificate {
    /// Random 63-bit gateway id, assigned once at creation.
    pub gateway_id: u64,
    /// Integer gateway type code (see `gateway/types.conf`).
    pub gateway_type: u32,
    /// Id of the owning user.
    pub owner_id: u64,
    /// Unique gateway name.
    pub name: String,
    /// Host the gateway serves from.
    pub host: String,
    /// Port the gateway serves on.
    pub port: u16,
    /// SPKI PEM public key of the gateway.
    pub public_key: String,
    /// Monotonic certificate version.
    pub version: u64,
    /// Expiry, seconds since the epoch.
    pub cert_expires: i64,
    /// Capability bitmask granted to the gateway.
    pub caps: u32,
    /// Id of the volume the gateway belongs to.
    pub volume_id: u64,
    /// Hex SHA-256 of the serialized driver bundle, or of the empty string
    /// when the gateway carries no driver.
    pub driver_hash: String,
    /// Base64 Ed25519 signature over the canonical record with this field
    /// cleared.
    pub signature: String,
}

impl GatewayCertificate {
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
    use super::*;
    use crate::crypto::{generate_keypair, sha256_hex, validate_private_key, OBJECT_KEY_BITS};

    fn sample_cert(public_pem: &str) -> GatewayCertificate {
        GatewayCertificate {
            gateway_id: 5000,
            gateway_type: 1,
            owner_id: 77,
            name: "gw-01".to_string(),
            host: "node1.example.com".to_string(),
            port: 31112,
            public_key: public_pem.to_string(),
            version: 1,
            cert_expires: 1_900_000_000,
            caps: 0x05,
            volume_id: 900,
            driver_hash: sha256_hex(b""),
            signature: String::new(),
        }
    }

    #[test]
    fn sign_then_verify_with_owner_key() {
        let (_, gateway_private) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let (owner_public, owner_private) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let owner_key = validate_private_key(&owner_private, OBJECT_KEY_BITS).unwrap();

        // The gateway's own key appears in the cert; the owner signs it.
        let gw_key = validate_private_key(&gateway_private, OBJECT_KEY_BITS).unwrap();
        let gw_public = crate::crypto::public_key_pem(&gw_key).unwrap();

        let mut cert = sample_cert(&gw_public);
        cert.sign_with(&owner_key).unwrap();
        cert.verify(&owner_public).unwrap();
        assert!(cert.verify(&gw_public).is_err());
    }

    #[test]
    fn caps_change_invalidates_signature() {
        let (owner_public, owner_private) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let owner_key = validate_private_key(&owner_private, OBJECT_KEY_BITS).unwrap();

        let mut cert = sample_cert(&owner_public);
        cert.sign_with(&owner_key).unwrap();
        cert.caps |= 0x02;
        assert!(cert.verify(&owner_public).is_err());
    }
}
