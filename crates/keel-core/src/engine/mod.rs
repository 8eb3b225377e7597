//! The certificate transition engine.
//!
//! One operation per `(entity kind, verb)` pair. For mutating verbs the
//! engine loads the existing certificate (if any), resolves every field
//! (explicit value → inherited → creation default), enforces the
//! immutability and version invariants, signs the new certificate under the
//! signing-authority policy, and returns the positional/keyword arguments
//! for the remote call. Read/list verbs pass a query through untouched.
//!
//! # Two-phase commit
//!
//! [`Engine::prepare`] is pure with respect to local state: it computes and
//! signs but writes nothing. Only after the remote submission succeeds does
//! [`Engine::commit`] persist certificates, keys, and id-index entries. A
//! crash or a remote error between the phases leaves local state exactly as
//! it was.
//!
//! # Signing authority
//!
//! | Entity  | Verb                              | Signer                  |
//! |---------|-----------------------------------|-------------------------|
//! | User    | create / delete / reset           | administrator's key     |
//! | User    | other updates                     | the user's own key      |
//! | Volume  | create / update / delete          | volume owner's key      |
//! | Gateway | create / update / delete          | the owning user's key   |
//! | Bundle  | always                            | volume owner's key      |

mod gateway;
mod user;
mod volume;

pub use gateway::{GatewayRequest, GatewayVerb};
pub use user::{UserRequest, UserVerb};
pub use volume::{VolumeRequest, VolumeVerb};

use ed25519_dalek::SigningKey;
use serde_json::Value;
use tracing::{debug, info};

use crate::cert::{self, GatewayCertificate, UserCertificate, VolumeCertificate};
use crate::config::{ClientConfig, ObjectKind};
use crate::crypto::{validate_private_key, OBJECT_KEY_BITS};
use crate::error::{Error, ValidationError};
use crate::index;
use crate::keystore::{KeyStore, KeyStoreError};
use crate::transport::{remote_error, ResultMap, Transport};

/// Default gateway port when none is given at creation.
pub const DEFAULT_GATEWAY_PORT: u16 = 31112;

/// Default gateway certificate lifetime: 365 days, in seconds.
pub const DEFAULT_GATEWAY_EXPIRY_SECS: i64 = 60 * 60 * 24 * 365;

/// Seconds per `yr` expiry unit (365.25-day years).
const SECONDS_PER_YEAR: i64 = 31_557_600;

/// A requested operation: entity kind, verb, and typed field values.
#[derive(Debug, Clone)]
pub enum Operation {
    /// A user-account operation.
    User {
        /// The verb.
        verb: UserVerb,
        /// Typed field values.
        request: UserRequest,
    },
    /// A volume operation.
    Volume {
        /// The verb.
        verb: VolumeVerb,
        /// Typed field values.
        request: VolumeRequest,
    },
    /// A gateway operation.
    Gateway {
        /// The verb.
        verb: GatewayVerb,
        /// Typed field values.
        request: GatewayRequest,
    },
}

/// A prepared operation: everything the transport needs, plus the local
/// persistence plan that runs only after the remote accepts it.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Remote verb name.
    pub verb: &'static str,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments; mutating verbs carry the base64 signed
    /// certificate, and bundle-triggering verbs the base64 bundle.
    pub kwargs: ResultMap,
    pub(crate) commit: CommitPlan,
}

/// Local persistence to perform once the remote call has succeeded.
#[derive(Debug, Clone)]
pub(crate) enum CommitPlan {
    /// Nothing to persist (read/list).
    None,
    /// Persist a user certificate and optionally its keys.
    StoreUser {
        cert: UserCertificate,
        private_key: Option<String>,
        public_key: Option<String>,
    },
    /// Erase the previous credentials, then persist the reissued
    /// certificate and fresh keys.
    ResetUser {
        cert: UserCertificate,
        private_key: Option<String>,
        public_key: String,
    },
    /// Remove every local trace of a user.
    DeleteUser { email: String, user_id: u64 },
    /// Persist a volume certificate (always rootless on disk).
    StoreVolume { cert: VolumeCertificate },
    /// Remove every local trace of a volume.
    DeleteVolume { name: String, volume_id: u64 },
    /// Persist a gateway certificate and, on creation, its keypair.
    StoreGateway {
        cert: GatewayCertificate,
        private_key: Option<String>,
        public_key: Option<String>,
    },
    /// Remove every local trace of a gateway.
    DeleteGateway { name: String, gateway_id: u64 },
}

/// The certificate transition engine.
///
/// Holds the client configuration and the key store; all certificate/id
/// state lives under [`ClientConfig::state_dir`].
pub struct Engine<'a> {
    config: &'a ClientConfig,
    keys: &'a dyn KeyStore,
}

impl<'a> Engine<'a> {
    /// Creates an engine over the given configuration and key store.
    #[must_use]
    pub fn new(config: &'a ClientConfig, keys: &'a dyn KeyStore) -> Self {
        Self { config, keys }
    }

    /// Computes and signs the transition for `op` without touching local
    /// state.
    ///
    /// # Errors
    ///
    /// Any invariant violation aborts with no side effect: validation,
    /// consistency, or key-store errors per the taxonomy in
    /// [`crate::error`].
    pub fn prepare(&self, op: &Operation) -> Result<Prepared, Error> {
        let prepared = match op {
            Operation::User { verb, request } => {
                user::prepare(self.config, self.keys, *verb, request)?
            },
            Operation::Volume { verb, request } => {
                volume::prepare(self.config, self.keys, *verb, request)?
            },
            Operation::Gateway { verb, request } => {
                gateway::prepare(self.config, self.keys, *verb, request)?
            },
        };
        debug!(verb = prepared.verb, "prepared transition");
        Ok(prepared)
    }

    /// Persists the local side of a prepared operation. Call only after the
    /// remote submission has succeeded.
    ///
    /// # Errors
    ///
    /// Returns storage or key-store errors; the remote state is already
    /// updated at this point, so callers should surface these loudly.
    pub fn commit(&self, prepared: &Prepared) -> Result<(), Error> {
        match &prepared.commit {
            CommitPlan::None => {},
            CommitPlan::StoreUser {
                cert,
                private_key,
                public_key,
            } => {
                cert::store_certificate(self.config, ObjectKind::User, &cert.email, cert)?;
                index::store_id(self.config, ObjectKind::User, &cert.email, cert.user_id)?;
                index::link_cert_by_id(self.config, ObjectKind::User, cert.user_id, &cert.email)?;
                if let Some(pem) = private_key {
                    self.keys
                        .store_private_key(ObjectKind::User, &cert.email, pem)?;
                }
                if let Some(pem) = public_key {
                    self.keys
                        .store_public_key(ObjectKind::User, &cert.email, pem)?;
                }
            },
            CommitPlan::ResetUser {
                cert,
                private_key,
                public_key,
            } => {
                self.keys.erase_private_key(ObjectKind::User, &cert.email)?;
                if let Some(pem) = private_key {
                    self.keys
                        .store_private_key(ObjectKind::User, &cert.email, pem)?;
                }
                self.keys
                    .store_public_key(ObjectKind::User, &cert.email, public_key)?;
                cert::store_certificate(self.config, ObjectKind::User, &cert.email, cert)?;
                index::link_cert_by_id(self.config, ObjectKind::User, cert.user_id, &cert.email)?;
            },
            CommitPlan::DeleteUser { email, user_id } => {
                index::remove_cert(self.config, ObjectKind::User, email)?;
                index::remove_id(self.config, ObjectKind::User, email)?;
                index::unlink_cert_by_id(self.config, ObjectKind::User, *user_id)?;
                self.keys.erase_private_key(ObjectKind::User, email)?;
                self.keys.erase_public_key(ObjectKind::User, email)?;
            },
            CommitPlan::StoreVolume { cert } => {
                let mut rootless = cert.clone();
                rootless.root = None;
                cert::store_certificate(self.config, ObjectKind::Volume, &cert.name, &rootless)?;
                index::store_id(self.config, ObjectKind::Volume, &cert.name, cert.volume_id)?;
                index::link_cert_by_id(
                    self.config,
                    ObjectKind::Volume,
                    cert.volume_id,
                    &cert.name,
                )?;
            },
            CommitPlan::DeleteVolume { name, volume_id } => {
                index::remove_cert(self.config, ObjectKind::Volume, name)?;
                index::remove_id(self.config, ObjectKind::Volume, name)?;
                index::unlink_cert_by_id(self.config, ObjectKind::Volume, *volume_id)?;
            },
            CommitPlan::StoreGateway {
                cert,
                private_key,
                public_key,
            } => {
                cert::store_certificate(self.config, ObjectKind::Gateway, &cert.name, cert)?;
                index::store_id(self.config, ObjectKind::Gateway, &cert.name, cert.gateway_id)?;
                index::link_cert_by_id(
                    self.config,
                    ObjectKind::Gateway,
                    cert.gateway_id,
                    &cert.name,
                )?;
                if let Some(pem) = private_key {
                    self.keys
                        .store_private_key(ObjectKind::Gateway, &cert.name, pem)?;
                }
                if let Some(pem) = public_key {
                    self.keys
                        .store_public_key(ObjectKind::Gateway, &cert.name, pem)?;
                }
            },
            CommitPlan::DeleteGateway { name, gateway_id } => {
                index::remove_cert(self.config, ObjectKind::Gateway, name)?;
                index::remove_id(self.config, ObjectKind::Gateway, name)?;
                index::unlink_cert_by_id(self.config, ObjectKind::Gateway, *gateway_id)?;
                self.keys.erase_private_key(ObjectKind::Gateway, name)?;
                self.keys.erase_public_key(ObjectKind::Gateway, name)?;
            },
        }
        Ok(())
    }

    /// Runs an operation end to end: prepare, submit, and — only on remote
    /// success — persist locally.
    ///
    /// # Errors
    ///
    /// Propagates preparation errors, [`Error::Remote`] when the result map
    /// carries an `error` key (local state untouched), and commit errors.
    pub fn execute(&self, op: &Operation, transport: &dyn Transport) -> Result<ResultMap, Error> {
        let prepared = self.prepare(op)?;
        info!(verb = prepared.verb, "submitting");
        let result = transport.submit(prepared.verb, &prepared.args, &prepared.kwargs)?;
        if let Some(message) = remote_error(&result) {
            info!(verb = prepared.verb, "remote rejected; skipping local persist");
            return Err(Error::Remote { message });
        }
        self.commit(&prepared)?;
        Ok(result)
    }
}

/// Draws a fresh random 63-bit object id.
pub(crate) fn fresh_object_id() -> u64 {
    rand::random::<u64>() >> 1
}

/// Parses an expiry duration token into seconds.
///
/// Units: `yr` (365.25-day years), `d`, `h`, `m`, `s`. Anything else is a
/// validation error.
///
/// # Errors
///
/// Returns [`ValidationError::BadExpiry`] for unknown units, unparsable
/// numbers, or negative durations.
pub fn parse_expiry(token: &str) -> Result<i64, ValidationError> {
    let trimmed = token.trim();
    let bad = || ValidationError::BadExpiry {
        token: token.to_string(),
    };

    let (number, unit_secs) = if let Some(n) = trimmed.strip_suffix("yr") {
        (n, SECONDS_PER_YEAR)
    } else if let Some(n) = trimmed.strip_suffix('d') {
        (n, 86_400)
    } else if let Some(n) = trimmed.strip_suffix('h') {
        (n, 3_600)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, 1)
    } else {
        return Err(bad());
    };

    let count: i64 = number.trim().parse().map_err(|_| bad())?;
    if count < 0 {
        return Err(bad());
    }
    count.checked_mul(unit_secs).ok_or_else(bad)
}

/// Structural email validation: one `@`, a bounded non-empty local part, a
/// non-empty domain, no whitespace or control characters.
pub(crate) fn validate_email(email: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidField {
        field: "email",
        reason: format!("not an email address: '{email}'"),
    };

    if email.is_empty() || email.len() > 256 {
        return Err(invalid());
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if local.is_empty() || local.len() > 64 || domain.is_empty() {
        return Err(invalid());
    }
    Ok(())
}

/// Loads and validates a signer's private key from the key store.
pub(crate) fn signing_key_for(
    keys: &dyn KeyStore,
    kind: ObjectKind,
    name: &str,
) -> Result<SigningKey, Error> {
    let pem = keys
        .load_private_key(kind, name)?
        .ok_or_else(|| KeyStoreError::MissingPrivateKey {
            kind,
            name: name.to_string(),
        })?;
    Ok(validate_private_key(&pem, OBJECT_KEY_BITS)?)
}

/// Base64-encodes canonical bytes for transport.
pub(crate) fn b64(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(bytes)
}

/// The gateway host to record when none is given: the local hostname.
pub(crate) fn default_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_units_parse() {
        assert_eq!(parse_expiry("1yr").unwrap(), 31_557_600);
        assert_eq!(parse_expiry("365d").unwrap(), 31_536_000);
        assert_eq!(parse_expiry("24h").unwrap(), 86_400);
        assert_eq!(parse_expiry("30m").unwrap(), 1_800);
        assert_eq!(parse_expiry("100s").unwrap(), 100);
    }

    #[test]
    fn bad_expiry_tokens_are_rejected() {
        for token in ["10w", "yr", "1.5d", "-3h", "100", ""] {
            assert!(
                matches!(
                    parse_expiry(token).unwrap_err(),
                    ValidationError::BadExpiry { .. }
                ),
                "token {token:?} should be rejected"
            );
        }
    }

    #[test]
    fn email_validation() {
        validate_email("alice@example.com").unwrap();
        validate_email("a@b").unwrap();
        for bad in ["", "alice", "@example.com", "alice@", "a b@c.d", "a@b@c"] {
            assert!(validate_email(bad).is_err(), "email {bad:?} should fail");
        }
    }

    #[test]
    fn object_ids_fit_in_63_bits() {
        for _ in 0..64 {
            assert!(fresh_object_id() < (1 << 63));
        }
    }
}
