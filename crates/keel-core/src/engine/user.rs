//! User-account transitions.

use serde_json::{json, Value};

use super::{
    b64, fresh_object_id, signing_key_for, validate_email, CommitPlan, Prepared,
};
use crate::cert::{load_certificate, UserCertificate, PUBLIC_KEY_UNSET};
use crate::config::{ClientConfig, ObjectKind};
use crate::crypto::{parse_or_generate, KeyMaterial, AUTO_KEY_TOKEN, OBJECT_KEY_BITS};
use crate::error::{ConsistencyError, Error, ValidationError};
use crate::index;
use crate::keystore::KeyStore;
use crate::transport::ResultMap;

/// Default volume allowance for a new account.
const DEFAULT_MAX_VOLUMES: u32 = 10;

/// Default gateway allowance for a new account.
const DEFAULT_MAX_GATEWAYS: u32 = 10;

/// Verbs on user accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserVerb {
    /// Create an account. Signed by the administrator.
    Create,
    /// Fetch one account by email.
    Read,
    /// Re-issue the account certificate. Signed by the user themselves.
    Update,
    /// Delete an account. Signed by the administrator.
    Delete,
    /// Query accounts.
    List,
    /// Wipe and regenerate the account's credentials. Signed by the
    /// administrator.
    ResetCredentials,
}

/// Typed field values for a user operation.
///
/// Every field is optional at the type level; which ones are required
/// depends on the verb, and missing values fall back to the existing
/// certificate or to creation defaults.
#[derive(Debug, Clone, Default)]
pub struct UserRequest {
    /// Account email (required for everything but `List`).
    pub email: Option<String>,
    /// Private-key token: `auto`, a PEM literal, or a path.
    pub private_key: Option<String>,
    /// Maximum volumes the account may own.
    pub max_volumes: Option<u32>,
    /// Maximum gateways the account may own.
    pub max_gateways: Option<u32>,
    /// Whether the account holds administrator rights.
    pub is_admin: Option<bool>,
    /// Pass-through query for `List`.
    pub query: Option<Value>,
}

pub(super) fn prepare(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    verb: UserVerb,
    request: &UserRequest,
) -> Result<Prepared, Error> {
    match verb {
        UserVerb::Read => {
            let email = require_email(request)?;
            Ok(Prepared {
                verb: "read_user",
                args: vec![json!(email)],
                kwargs: ResultMap::new(),
                commit: CommitPlan::None,
            })
        },
        UserVerb::List => Ok(Prepared {
            verb: "list_users",
            args: vec![request.query.clone().unwrap_or_else(|| json!({}))],
            kwargs: ResultMap::new(),
            commit: CommitPlan::None,
        }),
        UserVerb::Create => prepare_create(config, keys, request),
        UserVerb::Update => prepare_update(config, keys, request),
        UserVerb::Delete => prepare_delete(config, keys, request),
        UserVerb::ResetCredentials => prepare_reset(config, keys, request),
    }
}

fn require_email(request: &UserRequest) -> Result<String, Error> {
    let email = request
        .email
        .clone()
        .ok_or(ValidationError::MissingField { field: "email" })?;
    validate_email(&email)?;
    Ok(email)
}

/// Loads the acting administrator's identity and signing key.
fn admin_signer(
    config: &ClientConfig,
    keys: &dyn KeyStore,
) -> Result<(u64, ed25519_dalek::SigningKey), Error> {
    let admin_email = &config.username;
    let admin_key = signing_key_for(keys, ObjectKind::User, admin_email)?;
    let admin_id = index::lookup_id(config, ObjectKind::User, admin_email)?.ok_or_else(|| {
        ConsistencyError::UnresolvedName {
            kind: ObjectKind::User,
            name: admin_email.clone(),
        }
    })?;
    Ok((admin_id, admin_key))
}

fn resolve_key_material(request: &UserRequest) -> Result<KeyMaterial, Error> {
    let token = request
        .private_key
        .clone()
        .unwrap_or_else(|| AUTO_KEY_TOKEN.to_string());
    Ok(parse_or_generate(&token, OBJECT_KEY_BITS)?)
}

fn cert_kwargs(cert: &UserCertificate) -> Result<ResultMap, Error> {
    let mut kwargs = ResultMap::new();
    kwargs.insert(
        "user_cert_b64".to_string(),
        json!(b64(&crate::canonical::to_canonical_bytes(cert)?)),
    );
    Ok(kwargs)
}

fn prepare_create(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &UserRequest,
) -> Result<Prepared, Error> {
    let email = require_email(request)?;

    let existing: Option<UserCertificate> = load_certificate(config, ObjectKind::User, &email)?;
    if existing.is_some() {
        return Err(ConsistencyError::CertificateExists {
            kind: ObjectKind::User,
            name: email,
        }
        .into());
    }

    let (admin_id, admin_key) = admin_signer(config, keys)?;
    let material = resolve_key_material(request)?;

    let mut cert = UserCertificate {
        user_id: fresh_object_id(),
        email: email.clone(),
        public_key: material.public_pem.clone(),
        admin_id,
        is_admin: request.is_admin.unwrap_or(false),
        max_volumes: request.max_volumes.unwrap_or(DEFAULT_MAX_VOLUMES),
        max_gateways: request.max_gateways.unwrap_or(DEFAULT_MAX_GATEWAYS),
        signature: String::new(),
    };
    cert.sign_with(&admin_key)?;

    let kwargs = cert_kwargs(&cert)?;
    Ok(Prepared {
        verb: "create_user",
        args: vec![json!(email)],
        kwargs,
        commit: CommitPlan::StoreUser {
            private_key: material.private_pem,
            public_key: Some(material.public_pem),
            cert,
        },
    })
}

fn prepare_update(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &UserRequest,
) -> Result<Prepared, Error> {
    let email = require_email(request)?;

    let existing: UserCertificate = load_certificate(config, ObjectKind::User, &email)?
        .ok_or_else(|| ConsistencyError::CertificateMissing {
            kind: ObjectKind::User,
            name: email.clone(),
        })?;

    // The public key is immutable once set; only the reset path may replace
    // it. A key token is accepted here solely to populate a still-unset key.
    let mut public_key = existing.public_key.clone();
    let mut adopted: Option<KeyMaterial> = None;
    if request.private_key.is_some() {
        let material = resolve_key_material(request)?;
        if existing.public_key == PUBLIC_KEY_UNSET {
            public_key = material.public_pem.clone();
            adopted = Some(material);
        } else if material.public_pem != existing.public_key {
            return Err(ValidationError::ImmutableField {
                field: "public_key",
            }
            .into());
        }
    }

    let user_key = signing_key_for(keys, ObjectKind::User, &email)?;

    let mut cert = UserCertificate {
        user_id: existing.user_id,
        email: email.clone(),
        public_key,
        admin_id: existing.admin_id,
        is_admin: request.is_admin.unwrap_or(existing.is_admin),
        max_volumes: request.max_volumes.unwrap_or(existing.max_volumes),
        max_gateways: request.max_gateways.unwrap_or(existing.max_gateways),
        signature: String::new(),
    };
    cert.sign_with(&user_key)?;

    let kwargs = cert_kwargs(&cert)?;
    Ok(Prepared {
        verb: "update_user",
        args: vec![json!(email)],
        kwargs,
        commit: CommitPlan::StoreUser {
            private_key: adopted.as_ref().and_then(|m| m.private_pem.clone()),
            public_key: adopted.map(|m| m.public_pem),
            cert,
        },
    })
}

fn prepare_delete(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &UserRequest,
) -> Result<Prepared, Error> {
    let email = require_email(request)?;

    let existing: UserCertificate = load_certificate(config, ObjectKind::User, &email)?
        .ok_or_else(|| ConsistencyError::CertificateMissing {
            kind: ObjectKind::User,
            name: email.clone(),
        })?;

    let (_, admin_key) = admin_signer(config, keys)?;
    let mut cert = existing.clone();
    cert.sign_with(&admin_key)?;

    let kwargs = cert_kwargs(&cert)?;
    Ok(Prepared {
        verb: "delete_user",
        args: vec![json!(email)],
        kwargs,
        commit: CommitPlan::DeleteUser {
            email,
            user_id: existing.user_id,
        },
    })
}

fn prepare_reset(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &UserRequest,
) -> Result<Prepared, Error> {
    let email = require_email(request)?;

    let existing: UserCertificate = load_certificate(config, ObjectKind::User, &email)?
        .ok_or_else(|| ConsistencyError::CertificateMissing {
            kind: ObjectKind::User,
            name: email.clone(),
        })?;

    let (_, admin_key) = admin_signer(config, keys)?;
    let material = resolve_key_material(request)?;

    let mut cert = existing;
    cert.public_key = material.public_pem.clone();
    cert.signature = String::new();
    cert.sign_with(&admin_key)?;

    let kwargs = cert_kwargs(&cert)?;
    Ok(Prepared {
        verb: "reset_account_credentials",
        args: vec![json!(email)],
        kwargs,
        commit: CommitPlan::ResetUser {
            private_key: material.private_pem,
            public_key: material.public_pem,
            cert,
        },
    })
}
