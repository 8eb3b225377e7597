//! Error taxonomy for the issuance engine.
//!
//! Four classes drive caller behavior:
//!
//! - [`ValidationError`] — bad or missing field values, immutable-field
//!   change attempts, unparsable expiry/capability tokens, size-mismatched
//!   keys. Local, never retried, surfaced verbatim.
//! - [`ConsistencyError`] — cross-object state violations: unresolvable ids,
//!   signer does not own the referenced volume, certificate already exists
//!   on create or missing on update, version regressions. Local, fatal.
//! - [`KeyStoreError`](crate::keystore::KeyStoreError) — missing or
//!   unreadable key material for a required signer. Local, fatal.
//! - [`Error::Remote`] — the submission returned an `error` key. The engine
//!   does not interpret it; the persist phase is skipped and the message is
//!   propagated.
//!
//! Local certificate/id file I/O failures surface as
//! [`StorageError`](crate::index::StorageError): equally local and fatal,
//! kept distinct from the key store so the failing subsystem is obvious.
//! No class is ever retried by this crate.

use thiserror::Error;

use crate::canonical::CanonicalError;
use crate::capability::CapabilityError;
use crate::config::{ConfigError, ObjectKind};
use crate::crypto::{KeyError, SignatureError};
use crate::index::StorageError;
use crate::keystore::KeyStoreError;

/// A field value failed validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// A required field was neither supplied, inherited, nor defaulted.
    #[error("missing required field '{field}'")]
    MissingField {
        /// Field name.
        field: &'static str,
    },

    /// An immutable field would change.
    #[error("field '{field}' is immutable once set")]
    ImmutableField {
        /// Field name.
        field: &'static str,
    },

    /// A field value is malformed.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// An expiry token had an unrecognized unit suffix or number.
    #[error("unparsable expiry '{token}': expected units of yr, d, h, m, or s")]
    BadExpiry {
        /// The rejected token.
        token: String,
    },

    /// A gateway type token matched no alias and is not an integer.
    #[error("unknown gateway type '{token}'")]
    UnknownGatewayType {
        /// The rejected token.
        token: String,
    },

    /// A capability expression failed to parse.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Key material failed validation.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// A record could not be canonically serialized.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// A signature failed to parse or verify.
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Cross-object local state is inconsistent with the requested transition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConsistencyError {
    /// A certificate already exists for an entity being created.
    #[error("certificate already exists for {kind} '{name}'")]
    CertificateExists {
        /// Object kind.
        kind: ObjectKind,
        /// Object name.
        name: String,
    },

    /// No certificate is on file for an entity being mutated.
    #[error("no certificate on file for {kind} '{name}'")]
    CertificateMissing {
        /// Object kind.
        kind: ObjectKind,
        /// Object name.
        name: String,
    },

    /// A stored certificate is unreadable.
    #[error("unparsable certificate on file for {kind} '{name}': {reason}")]
    CertificateCorrupt {
        /// Object kind.
        kind: ObjectKind,
        /// Object name.
        name: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A certificate references an id with no resolvable name.
    #[error("no {kind} is known under id {id}")]
    UnresolvedId {
        /// Object kind.
        kind: ObjectKind,
        /// The dangling id.
        id: u64,
    },

    /// No id record exists for a name that must already be enrolled.
    #[error("no id on file for {kind} '{name}'")]
    UnresolvedName {
        /// Object kind.
        kind: ObjectKind,
        /// The name without an id record.
        name: String,
    },

    /// The acting user does not own the referenced volume.
    #[error("user '{user}' does not own volume '{volume}'")]
    NotVolumeOwner {
        /// Acting user email.
        user: String,
        /// Volume name.
        volume: String,
    },

    /// An in-flight certificate disagrees with the on-disk volume
    /// certificate.
    #[error("{field} mismatch: expected {expected}, got {got}")]
    BundleFieldMismatch {
        /// The disagreeing field (`owner_id` or `volume_id`).
        field: &'static str,
        /// Value in the on-disk volume certificate.
        expected: u64,
        /// Value in the override.
        got: u64,
    },

    /// A version override would not advance the entity's version.
    #[error("version override {proposed} does not advance current version {current}")]
    VersionRegression {
        /// Current on-disk version.
        current: u64,
        /// Proposed version.
        proposed: u64,
    },
}

/// Top-level error for every engine operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A field value failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Local state is inconsistent with the requested transition.
    #[error("consistency violation: {0}")]
    Consistency(#[from] ConsistencyError),

    /// Required key material is missing or unreadable.
    #[error("key store failure: {0}")]
    KeyStore(#[from] KeyStoreError),

    /// Local certificate/id storage failed.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// The remote submission reported an error; local persistence was
    /// skipped.
    #[error("remote error: {message}")]
    Remote {
        /// The error text returned by the metadata service, verbatim.
        message: String,
    },
}

impl From<CanonicalError> for Error {
    fn from(e: CanonicalError) -> Self {
        Self::Validation(ValidationError::Canonical(e))
    }
}

impl From<CapabilityError> for Error {
    fn from(e: CapabilityError) -> Self {
        Self::Validation(ValidationError::Capability(e))
    }
}

impl From<KeyError> for Error {
    fn from(e: KeyError) -> Self {
        Self::Validation(ValidationError::Key(e))
    }
}

impl From<SignatureError> for Error {
    fn from(e: SignatureError) -> Self {
        Self::Validation(ValidationError::Signature(e))
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidTypeAlias { line } => {
                Self::Validation(ValidationError::InvalidField {
                    field: "types.conf",
                    reason: format!("invalid type alias line '{line}'"),
                })
            },
            ConfigError::Io { path, source } => Self::Storage(StorageError::Io { path, source }),
            ConfigError::Parse(e) => Self::Validation(ValidationError::InvalidField {
                field: "config",
                reason: e.to_string(),
            }),
        }
    }
}
