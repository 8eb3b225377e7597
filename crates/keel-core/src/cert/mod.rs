//! Certificate records for users, volumes, and gateways.
//!
//! Every certificate is signed over the canonical encoding of the record
//! with its `signature` field cleared; the base64 signature is then embedded
//! back into the record. Certificates are persisted locally as their
//! canonical bytes, so the stored file is exactly the hashed/signed
//! representation.

mod gateway;
mod user;
mod volume;

pub use gateway::GatewayCertificate;
pub use user::UserCertificate;
pub use volume::{VolumeCertificate, VolumeRoot, FILE_QUOTA_UNLIMITED};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::canonical::to_canonical_bytes;
use crate::config::{ClientConfig, ObjectKind};
use crate::error::{ConsistencyError, Error};
use crate::index;

/// Sentinel for a public key that has not been assigned yet.
pub const PUBLIC_KEY_UNSET: &str = "unset";

/// Loads and deserializes a certificate by name. Returns `Ok(None)` when no
/// certificate is on file.
///
/// # Errors
///
/// Returns [`Error::Storage`] on I/O failure or a
/// [`ConsistencyError::CertificateCorrupt`] if the stored bytes do not
/// deserialize.
pub fn load_certificate<T: DeserializeOwned>(
    config: &ClientConfig,
    kind: ObjectKind,
    name: &str,
) -> Result<Option<T>, Error> {
    let Some(bytes) = index::load_cert_bytes(config, kind, name)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| {
            Error::Consistency(ConsistencyError::CertificateCorrupt {
                kind,
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
}

/// Serializes a certificate canonically and stores it under its name.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the record cannot be canonicalized or
/// [`Error::Storage`] on I/O failure.
pub fn store_certificate<T: Serialize>(
    config: &ClientConfig,
    kind: ObjectKind,
    name: &str,
    cert: &T,
) -> Result<(), Error> {
    let bytes = to_canonical_bytes(cert)?;
    index::store_cert_bytes(config, kind, name, &bytes)?;
    Ok(())
}
