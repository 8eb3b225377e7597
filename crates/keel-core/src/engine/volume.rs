//! Volume transitions.

use chrono::Utc;
use serde_json::{json, Value};

use super::{b64, fresh_object_id, signing_key_for, validate_email, CommitPlan, Prepared};
use crate::bundle::{build_trust_bundle, BundleOverride};
use crate::canonical::to_canonical_bytes;
use crate::cert::{load_certificate, VolumeCertificate, VolumeRoot, FILE_QUOTA_UNLIMITED};
use crate::config::{ClientConfig, ObjectKind};
use crate::error::{ConsistencyError, Error, ValidationError};
use crate::index;
use crate::keystore::{KeyStore, KeyStoreError};
use crate::transport::ResultMap;

/// Verbs on volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeVerb {
    /// Create a volume. Signed by the volume owner.
    Create,
    /// Fetch one volume by name.
    Read,
    /// Re-issue the volume certificate at the next version.
    Update,
    /// Delete a volume.
    Delete,
    /// Query volumes.
    List,
    /// Query public volumes.
    ListPublic,
    /// Query archive volumes.
    ListArchive,
}

/// Typed field values for a volume operation.
#[derive(Debug, Clone, Default)]
pub struct VolumeRequest {
    /// Volume name (required for everything but the list verbs). Immutable
    /// once assigned — the name is the lookup key, so a rename cannot even
    /// be expressed.
    pub name: Option<String>,
    /// Owner email; required on create.
    pub owner_email: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Block size in bytes; required on create, must be positive.
    pub blocksize: Option<u32>,
    /// Archive flag.
    pub archive: Option<bool>,
    /// Private flag.
    pub private: Option<bool>,
    /// Anonymous-read flag.
    pub allow_anon: Option<bool>,
    /// File quota; negative means unlimited.
    pub file_quota: Option<i64>,
    /// Explicit version override; accepted for debugging only and must
    /// still advance the version.
    pub version: Option<u64>,
    /// Pass-through query for the list verbs.
    pub query: Option<Value>,
}

pub(super) fn prepare(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    verb: VolumeVerb,
    request: &VolumeRequest,
) -> Result<Prepared, Error> {
    match verb {
        VolumeVerb::Read => {
            let name = require_name(request)?;
            Ok(Prepared {
                verb: "read_volume",
                args: vec![json!(name)],
                kwargs: ResultMap::new(),
                commit: CommitPlan::None,
            })
        },
        VolumeVerb::List | VolumeVerb::ListPublic | VolumeVerb::ListArchive => {
            let verb_name = match verb {
                VolumeVerb::List => "list_volumes",
                VolumeVerb::ListPublic => "list_public_volumes",
                _ => "list_archive_volumes",
            };
            Ok(Prepared {
                verb: verb_name,
                args: vec![request.query.clone().unwrap_or_else(|| json!({}))],
                kwargs: ResultMap::new(),
                commit: CommitPlan::None,
            })
        },
        VolumeVerb::Create => prepare_create(config, keys, request),
        VolumeVerb::Update => prepare_mutation(config, keys, request, false),
        VolumeVerb::Delete => prepare_mutation(config, keys, request, true),
    }
}

fn require_name(request: &VolumeRequest) -> Result<String, Error> {
    let name = request
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or(ValidationError::MissingField { field: "name" })?;
    Ok(name)
}

fn volume_kwargs(cert_bytes: &[u8], bundle_bytes: &[u8]) -> ResultMap {
    let mut kwargs = ResultMap::new();
    kwargs.insert("volume_cert_b64".to_string(), json!(b64(cert_bytes)));
    kwargs.insert("cert_bundle_b64".to_string(), json!(b64(bundle_bytes)));
    kwargs
}

fn prepare_create(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &VolumeRequest,
) -> Result<Prepared, Error> {
    let name = require_name(request)?;

    let existing: Option<VolumeCertificate> =
        load_certificate(config, ObjectKind::Volume, &name)?;
    if existing.is_some() {
        return Err(ConsistencyError::CertificateExists {
            kind: ObjectKind::Volume,
            name,
        }
        .into());
    }

    let owner_email = request
        .owner_email
        .clone()
        .ok_or(ValidationError::MissingField {
            field: "owner_email",
        })?;
    validate_email(&owner_email)?;

    let blocksize = request
        .blocksize
        .ok_or(ValidationError::MissingField { field: "blocksize" })?;
    if blocksize == 0 {
        return Err(ValidationError::InvalidField {
            field: "blocksize",
            reason: "must be positive".to_string(),
        }
        .into());
    }

    let owner_id =
        index::lookup_id(config, ObjectKind::User, &owner_email)?.ok_or_else(|| {
            ConsistencyError::UnresolvedName {
                kind: ObjectKind::User,
                name: owner_email.clone(),
            }
        })?;
    let volume_public_key = keys
        .load_public_key(ObjectKind::User, &owner_email)?
        .ok_or_else(|| KeyStoreError::MissingPublicKey {
            kind: ObjectKind::User,
            name: owner_email.clone(),
        })?;
    let owner_key = signing_key_for(keys, ObjectKind::User, &owner_email)?;

    let version = match request.version {
        None => 1,
        Some(v) if v >= 1 => v,
        Some(v) => {
            return Err(ConsistencyError::VersionRegression {
                current: 0,
                proposed: v,
            }
            .into())
        },
    };

    let description = request.description.clone().unwrap_or_else(|| {
        let now = Utc::now();
        format!(
            "A volume created at {}.{}",
            now.timestamp(),
            now.timestamp_subsec_nanos()
        )
    });

    let mut cert = VolumeCertificate {
        volume_id: fresh_object_id(),
        owner_id,
        owner_email: owner_email.clone(),
        volume_version: version,
        name,
        description,
        volume_public_key,
        archive: request.archive.unwrap_or(false),
        private: request.private.unwrap_or(true),
        allow_anon: request.allow_anon.unwrap_or(false),
        file_quota: request.file_quota.unwrap_or(FILE_QUOTA_UNLIMITED),
        blocksize,
        signature: String::new(),
        root: None,
    };
    cert.sign_with(&owner_key)?;

    let bundle = build_trust_bundle(
        config,
        keys,
        &owner_email,
        &cert.name,
        BundleOverride {
            volume_cert: Some(&cert),
            gateway_cert: None,
        },
    )?;

    // The creation message carries the separately signed root inode; the
    // persisted certificate does not.
    let mut root = VolumeRoot::for_volume(&cert);
    root.sign_with(&owner_key)?;
    cert.root = Some(root);

    let kwargs = volume_kwargs(
        &to_canonical_bytes(&cert)?,
        &to_canonical_bytes(&bundle)?,
    );
    Ok(Prepared {
        verb: "create_volume",
        args: Vec::new(),
        kwargs,
        commit: CommitPlan::StoreVolume { cert },
    })
}

fn prepare_mutation(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &VolumeRequest,
    delete: bool,
) -> Result<Prepared, Error> {
    let name = require_name(request)?;

    let existing: VolumeCertificate = load_certificate(config, ObjectKind::Volume, &name)?
        .ok_or_else(|| ConsistencyError::CertificateMissing {
            kind: ObjectKind::Volume,
            name: name.clone(),
        })?;

    if let Some(blocksize) = request.blocksize {
        if blocksize == 0 {
            return Err(ValidationError::InvalidField {
                field: "blocksize",
                reason: "must be positive".to_string(),
            }
            .into());
        }
    }

    let version = match request.version {
        None => existing.volume_version + 1,
        Some(v) if v > existing.volume_version => v,
        Some(v) => {
            return Err(ConsistencyError::VersionRegression {
                current: existing.volume_version,
                proposed: v,
            }
            .into())
        },
    };

    let owner_email = existing.owner_email.clone();
    let owner_key = signing_key_for(keys, ObjectKind::User, &owner_email)?;

    let mut cert = VolumeCertificate {
        volume_id: existing.volume_id,
        owner_id: existing.owner_id,
        owner_email: owner_email.clone(),
        volume_version: version,
        name: name.clone(),
        description: request
            .description
            .clone()
            .unwrap_or_else(|| existing.description.clone()),
        volume_public_key: existing.volume_public_key.clone(),
        archive: request.archive.unwrap_or(existing.archive),
        private: request.private.unwrap_or(existing.private),
        allow_anon: request.allow_anon.unwrap_or(existing.allow_anon),
        file_quota: request.file_quota.unwrap_or(existing.file_quota),
        blocksize: request.blocksize.unwrap_or(existing.blocksize),
        signature: String::new(),
        root: None,
    };
    cert.sign_with(&owner_key)?;

    let bundle = build_trust_bundle(
        config,
        keys,
        &owner_email,
        &name,
        BundleOverride {
            volume_cert: Some(&cert),
            gateway_cert: None,
        },
    )?;

    let kwargs = volume_kwargs(
        &to_canonical_bytes(&cert)?,
        &to_canonical_bytes(&bundle)?,
    );
    let args = vec![json!(cert.volume_id)];
    let commit = if delete {
        CommitPlan::DeleteVolume {
            name,
            volume_id: cert.volume_id,
        }
    } else {
        CommitPlan::StoreVolume { cert }
    };
    Ok(Prepared {
        verb: if delete { "delete_volume" } else { "update_volume" },
        args,
        kwargs,
        commit,
    })
}
