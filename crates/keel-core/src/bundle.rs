//! Trust-bundle assembly.
//!
//! A trust bundle is the signed manifest binding a volume to its member
//! gateways, letting any gateway validate the membership and capabilities of
//! its peers offline. Block 0 summarizes the volume certificate (including a
//! hash of its signed bytes); blocks 1..N describe the member gateways in
//! ascending gateway-id order. The envelope is signed by the volume owner.
//!
//! The builder accepts in-flight certificate overrides so a bundle can be
//! produced for a volume or gateway certificate that has not been persisted
//! yet — the two-phase commit discipline requires exactly that.

use std::collections::BTreeMap;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canonical::{to_canonical_bytes, CanonicalError};
use crate::cert::{load_certificate, GatewayCertificate, VolumeCertificate};
use crate::config::{ClientConfig, ObjectKind};
use crate::crypto::{
    sha256_hex, sign_bytes_b64, validate_private_key, verify_bytes_b64, SignatureError,
    OBJECT_KEY_BITS,
};
use crate::error::{ConsistencyError, Error};
use crate::index;
use crate::keystore::{KeyStore, KeyStoreError};

/// One block of a trust bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBundleBlock {
    /// Volume id for block 0, gateway id for the rest.
    pub id: u64,
    /// Volume version for block 0; 0 for gateway blocks.
    pub version: u64,
    /// Owning user id.
    pub owner_id: u64,
    /// Capability bitmask; 0 for the volume block.
    pub caps: u32,
    /// Hex SHA-256 of the signed volume certificate; present only in
    /// block 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Signed manifest binding a volume to its member gateways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBundle {
    /// The volume this bundle describes.
    pub volume_id: u64,
    /// The volume owner's user id.
    pub owner_id: u64,
    /// Mirrors the volume version; doubles as the bundle's own version for
    /// staleness comparison.
    pub bundle_version: u64,
    /// Assembly time, seconds since the epoch.
    pub timestamp: i64,
    /// Number of blocks, the volume block included.
    pub block_count: u64,
    /// Block 0 is the volume; blocks 1..N are gateways ascending by id.
    pub blocks: Vec<TrustBundleBlock>,
    /// Base64 Ed25519 signature by the volume owner over the canonical
    /// envelope with this field cleared.
    pub signature: String,
}

impl TrustBundle {
    /// Canonical bytes of the envelope with the signature cleared.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the record cannot be canonicalized.
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        to_canonical_bytes(&unsigned)
    }

    /// Signs the envelope in place with the volume owner's key.
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

/// In-flight certificates to substitute for their on-disk copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleOverride<'a> {
    /// Replaces the on-disk volume certificate.
    pub volume_cert: Option<&'a VolumeCertificate>,
    /// Replaces the on-disk gateway certificate of the same name, or is
    /// inserted if wholly new.
    pub gateway_cert: Option<&'a GatewayCertificate>,
}

/// Builds and signs the trust bundle for a volume.
///
/// # Errors
///
/// Fails with [`KeyStoreError::MissingPrivateKey`] if the owner's key is
/// unavailable, [`ConsistencyError::CertificateMissing`] if the volume
/// certificate is absent, or [`ConsistencyError::BundleFieldMismatch`] if a
/// supplied override disagrees with the on-disk volume certificate.
pub fn build_trust_bundle(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    volume_owner: &str,
    volume_name: &str,
    overrides: BundleOverride<'_>,
) -> Result<TrustBundle, Error> {
    let owner_pem = keys
        .load_private_key(ObjectKind::User, volume_owner)?
        .ok_or_else(|| KeyStoreError::MissingPrivateKey {
            kind: ObjectKind::User,
            name: volume_owner.to_string(),
        })?;
    let owner_key = validate_private_key(&owner_pem, OBJECT_KEY_BITS)?;

    let owner_id = index::lookup_id(config, ObjectKind::User, volume_owner)?.ok_or_else(|| {
        ConsistencyError::UnresolvedName {
            kind: ObjectKind::User,
            name: volume_owner.to_string(),
        }
    })?;

    let on_disk: Option<VolumeCertificate> =
        load_certificate(config, ObjectKind::Volume, volume_name)?;
    let volume_cert = match (overrides.volume_cert, on_disk.as_ref()) {
        (Some(cert), _) => cert,
        (None, Some(cert)) => cert,
        (None, None) => {
            return Err(ConsistencyError::CertificateMissing {
                kind: ObjectKind::Volume,
                name: volume_name.to_string(),
            }
            .into())
        },
    };

    if volume_cert.owner_id != owner_id {
        return Err(ConsistencyError::BundleFieldMismatch {
            field: "owner_id",
            expected: owner_id,
            got: volume_cert.owner_id,
        }
        .into());
    }
    if let Some(on_disk) = on_disk.as_ref() {
        if volume_cert.volume_id != on_disk.volume_id {
            return Err(ConsistencyError::BundleFieldMismatch {
                field: "volume_id",
                expected: on_disk.volume_id,
                got: volume_cert.volume_id,
            }
            .into());
        }
    }
    if let Some(gateway) = overrides.gateway_cert {
        if gateway.volume_id != volume_cert.volume_id {
            return Err(ConsistencyError::BundleFieldMismatch {
                field: "volume_id",
                expected: volume_cert.volume_id,
                got: gateway.volume_id,
            }
            .into());
        }
    }

    // Keyed by gateway id, so hard-linked `<id>.cert` aliases collapse and
    // the block order comes out ascending for free.
    let mut members: BTreeMap<u64, GatewayCertificate> = BTreeMap::new();
    let mut used_override = false;
    for name in index::list_cert_names(config, ObjectKind::Gateway)? {
        let cert = match overrides.gateway_cert {
            Some(gateway) if gateway.name == name => {
                used_override = true;
                gateway.clone()
            },
            _ => match load_certificate::<GatewayCertificate>(config, ObjectKind::Gateway, &name)? {
                Some(cert) => cert,
                None => continue,
            },
        };
        if cert.volume_id != volume_cert.volume_id {
            continue;
        }
        members.insert(cert.gateway_id, cert);
    }
    if !used_override {
        if let Some(gateway) = overrides.gateway_cert {
            members.insert(gateway.gateway_id, gateway.clone());
        }
    }

    let mut blocks = Vec::with_capacity(members.len() + 1);
    blocks.push(TrustBundleBlock {
        id: volume_cert.volume_id,
        version: volume_cert.volume_version,
        owner_id: volume_cert.owner_id,
        caps: 0,
        hash: Some(sha256_hex(&volume_cert.signed_bytes_rootless()?)),
    });
    for cert in members.values() {
        blocks.push(TrustBundleBlock {
            id: cert.gateway_id,
            version: 0,
            owner_id: cert.owner_id,
            caps: cert.caps,
            hash: None,
        });
    }

    let mut bundle = TrustBundle {
        volume_id: volume_cert.volume_id,
        owner_id: volume_cert.owner_id,
        bundle_version: volume_cert.volume_version,
        timestamp: Utc::now().timestamp(),
        block_count: blocks.len() as u64,
        blocks,
        signature: String::new(),
    };
    bundle.sign_with(&owner_key)?;

    debug!(
        volume = volume_name,
        blocks = bundle.block_count,
        version = bundle.bundle_version,
        "assembled trust bundle"
    );
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::store_certificate;
    use crate::crypto::generate_keypair;
    use crate::keystore::FsKeyStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: ClientConfig,
        keys: FsKeyStore,
        owner_public: String,
        owner_key: SigningKey,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new(dir.path().join("state"), "owner@example.com");
        config.ensure_dirs().unwrap();
        let keys = FsKeyStore::new(dir.path().join("keys"));

        let (owner_public, owner_private) = generate_keypair(OBJECT_KEY_BITS).unwrap();
        keys.store_private_key(ObjectKind::User, "owner@example.com", &owner_private)
            .unwrap();
        keys.store_public_key(ObjectKind::User, "owner@example.com", &owner_public)
            .unwrap();
        index::store_id(&config, ObjectKind::User, "owner@example.com", 77).unwrap();

        let owner_key = validate_private_key(&owner_private, OBJECT_KEY_BITS).unwrap();
        Fixture {
            _dir: dir,
            config,
            keys,
            owner_public,
            owner_key,
        }
    }

    fn volume_cert(fx: &Fixture) -> VolumeCertificate {
        let mut cert = VolumeCertificate {
            volume_id: 900,
            owner_id: 77,
            owner_email: "owner@example.com".to_string(),
            volume_version: 3,
            name: "data".to_string(),
            description: String::new(),
            volume_public_key: fx.owner_public.clone(),
            archive: false,
            private: true,
            allow_anon: false,
            file_quota: -1,
            blocksize: 61440,
            signature: String::new(),
            root: None,
        };
        cert.sign_with(&fx.owner_key).unwrap();
        cert
    }

    fn gateway_cert(fx: &Fixture, name: &str, id: u64, caps: u32) -> GatewayCertificate {
        let mut cert = GatewayCertificate {
            gateway_id: id,
            gateway_type: 1,
            owner_id: 77,
            name: name.to_string(),
            host: "h".to_string(),
            port: 31112,
            public_key: fx.owner_public.clone(),
            version: 1,
            cert_expires: 2_000_000_000,
            caps,
            volume_id: 900,
            driver_hash: sha256_hex(b""),
            signature: String::new(),
        };
        cert.sign_with(&fx.owner_key).unwrap();
        cert
    }

    #[test]
    fn blocks_are_sorted_and_block0_hashes_the_volume_cert() {
        let fx = fixture();
        let volume = volume_cert(&fx);
        store_certificate(&fx.config, ObjectKind::Volume, "data", &volume).unwrap();

        // Stored out of id order on purpose.
        let gw_b = gateway_cert(&fx, "gw-b", 5002, 0x3);
        let gw_a = gateway_cert(&fx, "gw-a", 5001, 0x5);
        store_certificate(&fx.config, ObjectKind::Gateway, "gw-b", &gw_b).unwrap();
        store_certificate(&fx.config, ObjectKind::Gateway, "gw-a", &gw_a).unwrap();

        let bundle = build_trust_bundle(
            &fx.config,
            &fx.keys,
            "owner@example.com",
            "data",
            BundleOverride::default(),
        )
        .unwrap();

        assert_eq!(bundle.block_count, 3);
        assert_eq!(bundle.bundle_version, 3);
        let ids: Vec<u64> = bundle.blocks.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![900, 5001, 5002]);
        assert_eq!(bundle.blocks[0].caps, 0);
        assert_eq!(
            bundle.blocks[0].hash.as_deref(),
            Some(sha256_hex(&volume.signed_bytes_rootless().unwrap()).as_str())
        );
        assert!(bundle.blocks[1].hash.is_none());
        bundle.verify(&fx.owner_public).unwrap();
    }

    #[test]
    fn hard_linked_id_certs_do_not_duplicate_members() {
        let fx = fixture();
        store_certificate(&fx.config, ObjectKind::Volume, "data", &volume_cert(&fx)).unwrap();

        let gw = gateway_cert(&fx, "gw-a", 5001, 0x5);
        store_certificate(&fx.config, ObjectKind::Gateway, "gw-a", &gw).unwrap();
        index::link_cert_by_id(&fx.config, ObjectKind::Gateway, 5001, "gw-a").unwrap();

        let bundle = build_trust_bundle(
            &fx.config,
            &fx.keys,
            "owner@example.com",
            "data",
            BundleOverride::default(),
        )
        .unwrap();
        assert_eq!(bundle.block_count, 2);
    }

    #[test]
    fn in_flight_gateway_cert_replaces_and_inserts() {
        let fx = fixture();
        store_certificate(&fx.config, ObjectKind::Volume, "data", &volume_cert(&fx)).unwrap();

        let stale = gateway_cert(&fx, "gw-a", 5001, 0x5);
        store_certificate(&fx.config, ObjectKind::Gateway, "gw-a", &stale).unwrap();

        // Replacement for an existing member.
        let updated = gateway_cert(&fx, "gw-a", 5001, 0xF);
        let bundle = build_trust_bundle(
            &fx.config,
            &fx.keys,
            "owner@example.com",
            "data",
            BundleOverride {
                volume_cert: None,
                gateway_cert: Some(&updated),
            },
        )
        .unwrap();
        assert_eq!(bundle.block_count, 2);
        assert_eq!(bundle.blocks[1].caps, 0xF);

        // Wholly new member.
        let fresh = gateway_cert(&fx, "gw-new", 4000, 0x1);
        let bundle = build_trust_bundle(
            &fx.config,
            &fx.keys,
            "owner@example.com",
            "data",
            BundleOverride {
                volume_cert: None,
                gateway_cert: Some(&fresh),
            },
        )
        .unwrap();
        assert_eq!(bundle.block_count, 3);
        assert_eq!(bundle.blocks[1].id, 4000);
    }

    #[test]
    fn gateways_of_other_volumes_are_excluded() {
        let fx = fixture();
        store_certificate(&fx.config, ObjectKind::Volume, "data", &volume_cert(&fx)).unwrap();

        let mut foreign = gateway_cert(&fx, "gw-x", 6000, 0x1);
        foreign.volume_id = 901;
        foreign.sign_with(&fx.owner_key).unwrap();
        store_certificate(&fx.config, ObjectKind::Gateway, "gw-x", &foreign).unwrap();

        let bundle = build_trust_bundle(
            &fx.config,
            &fx.keys,
            "owner@example.com",
            "data",
            BundleOverride::default(),
        )
        .unwrap();
        assert_eq!(bundle.block_count, 1);
    }

    #[test]
    fn owner_mismatch_fails() {
        let fx = fixture();
        let mut volume = volume_cert(&fx);
        volume.owner_id = 78;
        volume.sign_with(&fx.owner_key).unwrap();
        store_certificate(&fx.config, ObjectKind::Volume, "data", &volume).unwrap();

        let err = build_trust_bundle(
            &fx.config,
            &fx.keys,
            "owner@example.com",
            "data",
            BundleOverride::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Consistency(ConsistencyError::BundleFieldMismatch {
                field: "owner_id",
                ..
            })
        ));
    }

    #[test]
    fn missing_volume_cert_fails() {
        let fx = fixture();
        let err = build_trust_bundle(
            &fx.config,
            &fx.keys,
            "owner@example.com",
            "nothere",
            BundleOverride::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Consistency(ConsistencyError::CertificateMissing { .. })
        ));
    }

    #[test]
    fn missing_owner_key_fails() {
        let fx = fixture();
        store_certificate(&fx.config, ObjectKind::Volume, "data", &volume_cert(&fx)).unwrap();
        index::store_id(&fx.config, ObjectKind::User, "other@example.com", 78).unwrap();

        let err = build_trust_bundle(
            &fx.config,
            &fx.keys,
            "other@example.com",
            "data",
            BundleOverride::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::KeyStore(KeyStoreError::MissingPrivateKey { .. })
        ));
    }
}
