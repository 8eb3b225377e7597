//! Volume certificates and the separately signed root directory inode.

use chrono::Utc;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::canonical::{to_canonical_bytes, CanonicalError};
use crate::crypto::{sign_bytes_b64, verify_bytes_b64, SignatureError};

/// Sentinel meaning "no file quota".
pub const FILE_QUOTA_UNLIMITED: i64 = -1;

/// Freshness window, in milliseconds, granted to the root inode.
const ROOT_FRESHNESS_MS: u32 = 5000;

/// Certificate describing a volume and its owner.
///
/// `volume_version` strictly increases on every mutation; the volume name is
/// immutable once assigned. The `root` substructure is present only in the
/// creation message and is signed separately from the certificate itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCertificate {
    /// Random 63-bit volume id, assigned once at creation.
    pub volume_id: u64,
    /// Id of the owning user.
    pub owner_id: u64,
    /// Email of the owning user.
    pub owner_email: String,
    /// Monotonic version, incremented on every mutation.
    pub volume_version: u64,
    /// Unique, immutable volume name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// SPKI PEM public key of the volume (the owner's key).
    pub volume_public_key: String,
    /// Whether the volume is an archive.
    pub archive: bool,
    /// Whether the volume is private.
    pub private: bool,
    /// Whether anonymous reads are allowed.
    pub allow_anon: bool,
    /// Maximum file count, or [`FILE_QUOTA_UNLIMITED`].
    pub file_quota: i64,
    /// Block size in bytes; must be positive.
    pub blocksize: u32,
    /// Base64 Ed25519 signature over the canonical record with this field
    /// cleared and `root` absent.
    pub signature: String,
    /// Root directory inode, present only in the creation message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<VolumeRoot>,
}

/// The volume's root directory inode, issued once at volume creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRoot {
    /// Inode type tag; always `"DIR"` for the root.
    pub r#type: String,
    /// File id of the root; always 0.
    pub file_id: u64,
    /// Creation time, seconds since the epoch.
    pub ctime_sec: i64,
    /// Creation time, nanosecond remainder.
    pub ctime_nsec: u32,
    /// Modification time, seconds since the epoch.
    pub mtime_sec: i64,
    /// Modification time, nanosecond remainder.
    pub mtime_nsec: u32,
    /// Owning user id.
    pub owner: u64,
    /// Coordinator gateway id; 0 until one claims the inode.
    pub coordinator: u64,
    /// Id of the enclosing volume.
    pub volume: u64,
    /// Unix permission bits.
    pub mode: u32,
    /// Size in bytes; 4096 for directory compatibility.
    pub size: u64,
    /// Inode version.
    pub version: u64,
    /// How long, in milliseconds, cached reads stay fresh.
    pub max_read_freshness: u32,
    /// How long, in milliseconds, cached writes stay fresh.
    pub max_write_freshness: u32,
    /// Path component; `/` for the root.
    pub name: String,
    /// Write nonce.
    pub write_nonce: u64,
    /// Extended-attribute nonce.
    pub xattr_nonce: u64,
    /// Generation counter.
    pub generation: u64,
    /// Parent inode id; the root is its own parent at 0.
    pub parent_id: u64,
    /// Number of child entries.
    pub num_children: u64,
    /// Directory capacity hint.
    pub capacity: u64,
    /// Base64 Ed25519 signature over the canonical inode with this field
    /// cleared.
    pub signature: String,
}

impl VolumeRoot {
    /// Builds the default root inode for a volume certificate.
    #[must_use]
    pub fn for_volume(cert: &VolumeCertificate) -> Self {
        let now = Utc::now();
        let now_sec = now.timestamp();
        let now_nsec = now.timestamp_subsec_nanos();
        Self {
            r#type: "DIR".to_string(),
            file_id: 0,
            ctime_sec: now_sec,
            ctime_nsec: now_nsec,
            mtime_sec: now_sec,
            mtime_nsec: now_nsec,
            owner: cert.owner_id,
            coordinator: 0,
            volume: cert.volume_id,
            mode: 0o700,
            size: 4096,
            version: 1,
            max_read_freshness: ROOT_FRESHNESS_MS,
            max_write_freshness: ROOT_FRESHNESS_MS,
            name: "/".to_string(),
            write_nonce: 1,
            xattr_nonce: 1,
            generation: 1,
            parent_id: 0,
            num_children: 0,
            capacity: 16,
            signature: String::new(),
        }
    }

    /// Canonical bytes of the inode with the signature cleared.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the record cannot be canonicalized.
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        to_canonical_bytes(&unsigned)
    }

    /// Signs the inode in place with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the record cannot be canonicalized.
    pub fn sign_with(&mut self, key: &SigningKey) -> Result<(), CanonicalError> {
        let bytes = self.unsigned_bytes()?;
        self.signature = sign_bytes_b64(key, &bytes);
        Ok(())
    }
}

impl VolumeCertificate {
    /// Canonical bytes of the certificate with the signature cleared and the
    /// root inode absent. The certificate signature never covers the root;
    /// the root carries its own.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the record cannot be canonicalized.
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        unsigned.root = None;
        to_canonical_bytes(&unsigned)
    }

    /// Canonical bytes of the signed certificate without the root inode.
    /// This is the persisted form and the preimage of the trust-bundle
    /// block hash.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the record cannot be canonicalized.
    pub fn signed_bytes_rootless(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut rootless = self.clone();
        rootless.root = None;
        to_canonical_bytes(&rootless)
    }

    /// Signs the certificate in place with `key`. The root inode, if any,
    /// is not covered and must be signed separately.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the record cannot be canonicalized.
    pub fn sign_with(&mut self, key: &SigningKey) -> Result<(), CanonicalError> {
        let bytes = self.unsigned_bytes()?;
        self.signature = sign_bytes_b64(key, &bytes);
        Ok(())
    }

    /// Verifies the embedded signature against `volume_public_key` (or any
    /// supplied SPKI PEM key).
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
    use crate::crypto::{generate_keypair, validate_private_key, OBJECT_KEY_BITS};

    fn sample_cert(public_pem: &str) -> VolumeCertificate {
        VolumeCertificate {
            volume_id: 900,
            owner_id: 77,
            owner_email: "alice@example.com".to_string(),
            volume_version: 1,
            name: "data".to_string(),
            description: "test volume".to_string(),
            volume_public_key: public_pem.to_string(),
            archive: false,
            private: true,
            allow_anon: false,
            file_quota: FILE_QUOTA_UNLIMITED,
            blocksize: 61440,
            signature: String::new(),
            root: None,
        }
    }

    #[test]
    fn signature_does_not_cover_the_root_inode() {
        let (public_pem, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let key = validate_private_key(&private_pem, OBJECT_KEY_BITS).unwrap();

        let mut cert = sample_cert(&public_pem);
        cert.sign_with(&key).unwrap();
        cert.verify(&public_pem).unwrap();

        // Attaching the signed root must not invalidate the cert signature.
        let mut root = VolumeRoot::for_volume(&cert);
        root.sign_with(&key).unwrap();
        cert.root = Some(root);
        cert.verify(&public_pem).unwrap();
    }

    #[test]
    fn root_inode_defaults() {
        let (public_pem, _) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let cert = sample_cert(&public_pem);
        let root = VolumeRoot::for_volume(&cert);

        assert_eq!(root.r#type, "DIR");
        assert_eq!(root.file_id, 0);
        assert_eq!(root.mode, 0o700);
        assert_eq!(root.size, 4096);
        assert_eq!(root.generation, 1);
        assert_eq!(root.write_nonce, 1);
        assert_eq!(root.xattr_nonce, 1);
        assert_eq!(root.max_read_freshness, 5000);
        assert_eq!(root.max_write_freshness, 5000);
        assert_eq!(root.owner, cert.owner_id);
        assert_eq!(root.volume, cert.volume_id);
    }

    #[test]
    fn rootless_signed_bytes_match_persisted_form() {
        let (public_pem, private_pem) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        let key = validate_private_key(&private_pem, OBJECT_KEY_BITS).unwrap();

        let mut cert = sample_cert(&public_pem);
        cert.sign_with(&key).unwrap();
        let rootless = cert.signed_bytes_rootless().unwrap();

        let mut with_root = cert.clone();
        let mut root = VolumeRoot::for_volume(&with_root);
        root.sign_with(&key).unwrap();
        with_root.root = Some(root);

        assert_eq!(with_root.signed_bytes_rootless().unwrap(), rootless);
    }
}
