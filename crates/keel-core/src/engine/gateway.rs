//! Gateway transitions.
//!
//! Gateway updates decide whether the volume's trust bundle must be
//! regenerated. Three conditions force it, each on its own:
//!
//! 1. the verb is create or delete;
//! 2. the update expands the capability mask (`old | new != old`);
//! 3. the acting principal is not the owner recorded in the existing
//!    certificate (e.g. the volume owner correcting another user's
//!    gateway), so remote observers notice the change.
//!
//! Only the volume owner may regenerate the bundle; a transition that needs
//! one under any other principal fails.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    b64, default_host, fresh_object_id, parse_expiry, signing_key_for, validate_email,
    CommitPlan, Prepared, DEFAULT_GATEWAY_EXPIRY_SECS, DEFAULT_GATEWAY_PORT,
};
use crate::bundle::{build_trust_bundle, BundleOverride};
use crate::canonical::to_canonical_bytes;
use crate::capability::{caps_expanded, parse_caps};
use crate::cert::{load_certificate, GatewayCertificate, VolumeCertificate};
use crate::config::{load_gateway_type_aliases, ClientConfig, ObjectKind};
use crate::crypto::{parse_or_generate, AUTO_KEY_TOKEN, OBJECT_KEY_BITS};
use crate::driver::{driver_hash, load_driver, DriverError};
use crate::error::{ConsistencyError, Error, ValidationError};
use crate::index;
use crate::keystore::{KeyStore, KeyStoreError};
use crate::transport::ResultMap;

/// Verbs on gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayVerb {
    /// Create a gateway. Signed by the owning user; always bundles.
    Create,
    /// Fetch one gateway by name.
    Read,
    /// Re-issue the gateway certificate at the next version.
    Update,
    /// Delete a gateway; always bundles.
    Delete,
    /// Query gateways.
    List,
}

/// Typed field values for a gateway operation.
#[derive(Debug, Clone, Default)]
pub struct GatewayRequest {
    /// Gateway name (required for everything but `List`).
    pub name: Option<String>,
    /// Acting/owning user's email. Required on create; defaults to the
    /// recorded owner on update and delete.
    pub email: Option<String>,
    /// Volume name. Required on create; immutable thereafter.
    pub volume: Option<String>,
    /// Gateway type: an integer literal or an alias from
    /// `gateway/types.conf`.
    pub gateway_type: Option<String>,
    /// Capability expression (integer, alias, or `|`-joined flags).
    pub caps: Option<String>,
    /// Host the gateway serves from.
    pub host: Option<String>,
    /// Port the gateway serves on.
    pub port: Option<u16>,
    /// Driver directory to package and hash into the certificate.
    pub driver: Option<PathBuf>,
    /// Expiry duration token (`1yr`, `30d`, ...), added to now.
    pub expires: Option<String>,
    /// Public-key token: `auto`, a PEM literal, or a path.
    pub public_key: Option<String>,
    /// Explicit version override; accepted for debugging only and must
    /// still advance the version.
    pub version: Option<u64>,
    /// Pass-through query for `List`; must be a single map.
    pub query: Option<Value>,
}

pub(super) fn prepare(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    verb: GatewayVerb,
    request: &GatewayRequest,
) -> Result<Prepared, Error> {
    match verb {
        GatewayVerb::Read => {
            let name = require_name(request)?;
            Ok(Prepared {
                verb: "read_gateway",
                args: vec![json!(name)],
                kwargs: ResultMap::new(),
                commit: CommitPlan::None,
            })
        },
        GatewayVerb::List => {
            let query = match &request.query {
                None => json!({}),
                Some(q @ Value::Object(_)) => q.clone(),
                Some(other) => {
                    return Err(ValidationError::InvalidField {
                        field: "query",
                        reason: format!("not a map: {other}"),
                    }
                    .into())
                },
            };
            Ok(Prepared {
                verb: "list_gateways",
                args: vec![query],
                kwargs: ResultMap::new(),
                commit: CommitPlan::None,
            })
        },
        GatewayVerb::Create => prepare_create(config, keys, request),
        GatewayVerb::Update => prepare_update(config, keys, request),
        GatewayVerb::Delete => prepare_delete(config, keys, request),
    }
}

fn require_name(request: &GatewayRequest) -> Result<String, Error> {
    request
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ValidationError::MissingField { field: "name" }.into())
}

/// Resolves a gateway type token: integer literal first, then the alias
/// table.
fn resolve_gateway_type(config: &ClientConfig, token: &str) -> Result<u32, Error> {
    if let Ok(code) = token.trim().parse::<u32>() {
        return Ok(code);
    }
    let aliases = load_gateway_type_aliases(config)?;
    aliases
        .get(token.trim())
        .copied()
        .ok_or_else(|| {
            ValidationError::UnknownGatewayType {
                token: token.to_string(),
            }
            .into()
        })
}

/// Loads the volume certificate governing a gateway, by request field or by
/// the id recorded in the existing certificate (resolved over the slow
/// reverse index).
fn resolve_volume(
    config: &ClientConfig,
    request: &GatewayRequest,
    existing: Option<&GatewayCertificate>,
) -> Result<VolumeCertificate, Error> {
    if let Some(volume_name) = &request.volume {
        return load_certificate(config, ObjectKind::Volume, volume_name)?.ok_or_else(|| {
            ConsistencyError::CertificateMissing {
                kind: ObjectKind::Volume,
                name: volume_name.clone(),
            }
            .into()
        });
    }

    let Some(existing) = existing else {
        return Err(ValidationError::MissingField { field: "volume" }.into());
    };
    let volume_name = index::lookup_name_by_id(config, ObjectKind::Volume, existing.volume_id)?
        .ok_or(ConsistencyError::UnresolvedId {
            kind: ObjectKind::Volume,
            id: existing.volume_id,
        })?;
    load_certificate(config, ObjectKind::Volume, &volume_name)?.ok_or_else(|| {
        ConsistencyError::CertificateMissing {
            kind: ObjectKind::Volume,
            name: volume_name,
        }
        .into()
    })
}

/// Resolves the acting principal: the request email, or the owner recorded
/// in the existing certificate.
fn resolve_acting_user(
    config: &ClientConfig,
    request: &GatewayRequest,
    existing: Option<&GatewayCertificate>,
) -> Result<(String, u64), Error> {
    let email = match (&request.email, existing) {
        (Some(email), _) => email.clone(),
        (None, Some(cert)) => index::lookup_name_by_id(config, ObjectKind::User, cert.owner_id)?
            .ok_or(ConsistencyError::UnresolvedId {
                kind: ObjectKind::User,
                id: cert.owner_id,
            })?,
        (None, None) => return Err(ValidationError::MissingField { field: "email" }.into()),
    };
    validate_email(&email)?;
    let owner_id = index::lookup_id(config, ObjectKind::User, &email)?.ok_or_else(|| {
        ConsistencyError::UnresolvedName {
            kind: ObjectKind::User,
            name: email.clone(),
        }
    })?;
    Ok((email, owner_id))
}

fn map_driver_error(e: DriverError) -> Error {
    ValidationError::InvalidField {
        field: "driver",
        reason: e.to_string(),
    }
    .into()
}

fn gateway_kwargs(
    cert: &GatewayCertificate,
    driver_text: Option<&str>,
    bundle_bytes: Option<&[u8]>,
) -> Result<ResultMap, Error> {
    let mut kwargs = ResultMap::new();
    kwargs.insert(
        "gateway_cert_b64".to_string(),
        json!(b64(&to_canonical_bytes(cert)?)),
    );
    if let Some(text) = driver_text {
        kwargs.insert("driver_text".to_string(), json!(text));
    }
    if let Some(bytes) = bundle_bytes {
        kwargs.insert("cert_bundle_b64".to_string(), json!(b64(bytes)));
    }
    Ok(kwargs)
}

fn prepare_create(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &GatewayRequest,
) -> Result<Prepared, Error> {
    let name = require_name(request)?;

    let existing: Option<GatewayCertificate> =
        load_certificate(config, ObjectKind::Gateway, &name)?;
    if existing.is_some() {
        return Err(ConsistencyError::CertificateExists {
            kind: ObjectKind::Gateway,
            name,
        }
        .into());
    }

    // The volume must exist before a gateway can be created in it.
    let volume_cert = resolve_volume(config, request, None)?;

    let (owner_email, owner_id) = resolve_acting_user(config, request, None)?;

    let gateway_type = match &request.gateway_type {
        Some(token) => resolve_gateway_type(config, token)?,
        None => 0,
    };
    let caps = match &request.caps {
        Some(expression) => parse_caps(expression)?.bits(),
        None => 0,
    };

    let key_token = request
        .public_key
        .clone()
        .unwrap_or_else(|| AUTO_KEY_TOKEN.to_string());
    let material = parse_or_generate(&key_token, OBJECT_KEY_BITS)?;
    let Some(gateway_private_pem) = material.private_pem.clone() else {
        // A bare public key cannot create a gateway: the driver sealer and
        // the gateway process itself need the private half.
        return Err(ValidationError::MissingField {
            field: "private_key",
        }
        .into());
    };

    let gateway_id = match index::lookup_id(config, ObjectKind::Gateway, &name)? {
        Some(id) => id,
        None => fresh_object_id(),
    };

    let expiry_secs = match &request.expires {
        Some(token) => parse_expiry(token)?,
        None => DEFAULT_GATEWAY_EXPIRY_SECS,
    };

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

    let driver_text = match &request.driver {
        Some(dir) => Some(load_driver(dir, &gateway_private_pem).map_err(map_driver_error)?),
        None => None,
    };

    let owner_key = signing_key_for(keys, ObjectKind::User, &owner_email)?;

    let mut cert = GatewayCertificate {
        gateway_id,
        gateway_type,
        owner_id,
        name: name.clone(),
        host: request.host.clone().unwrap_or_else(default_host),
        port: request.port.unwrap_or(DEFAULT_GATEWAY_PORT),
        public_key: material.public_pem.clone(),
        version,
        cert_expires: Utc::now().timestamp() + expiry_secs,
        caps,
        volume_id: volume_cert.volume_id,
        driver_hash: driver_hash(driver_text.as_deref()),
        signature: String::new(),
    };
    cert.sign_with(&owner_key)?;

    // Creation always regenerates the bundle, and only the volume owner may
    // do that.
    if owner_id != volume_cert.owner_id {
        return Err(ConsistencyError::NotVolumeOwner {
            user: owner_email,
            volume: volume_cert.name,
        }
        .into());
    }
    let bundle = build_trust_bundle(
        config,
        keys,
        &owner_email,
        &volume_cert.name,
        BundleOverride {
            volume_cert: None,
            gateway_cert: Some(&cert),
        },
    )?;

    let kwargs = gateway_kwargs(
        &cert,
        driver_text.as_deref(),
        Some(&to_canonical_bytes(&bundle)?),
    )?;
    Ok(Prepared {
        verb: "create_gateway",
        args: Vec::new(),
        kwargs,
        commit: CommitPlan::StoreGateway {
            private_key: Some(gateway_private_pem),
            public_key: Some(material.public_pem),
            cert,
        },
    })
}

fn prepare_update(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &GatewayRequest,
) -> Result<Prepared, Error> {
    let name = require_name(request)?;

    let existing: GatewayCertificate = load_certificate(config, ObjectKind::Gateway, &name)?
        .ok_or_else(|| ConsistencyError::CertificateMissing {
            kind: ObjectKind::Gateway,
            name: name.clone(),
        })?;

    let volume_cert = resolve_volume(config, request, Some(&existing))?;
    if volume_cert.volume_id != existing.volume_id {
        return Err(ValidationError::ImmutableField { field: "volume_id" }.into());
    }

    let (acting_email, acting_id) = resolve_acting_user(config, request, Some(&existing))?;

    let gateway_type = match &request.gateway_type {
        Some(token) => resolve_gateway_type(config, token)?,
        None => existing.gateway_type,
    };
    let caps = match &request.caps {
        Some(expression) => parse_caps(expression)?.bits(),
        None => existing.caps,
    };

    // The gateway keypair has no reset path; a supplied key must match.
    let public_key = match &request.public_key {
        Some(token) => {
            let material = parse_or_generate(token, OBJECT_KEY_BITS)?;
            if material.public_pem != existing.public_key {
                return Err(ValidationError::ImmutableField {
                    field: "public_key",
                }
                .into());
            }
            material.public_pem
        },
        None => existing.public_key.clone(),
    };

    let cert_expires = match &request.expires {
        Some(token) => Utc::now().timestamp() + parse_expiry(token)?,
        None => existing.cert_expires,
    };

    let version = match request.version {
        None => existing.version + 1,
        Some(v) if v > existing.version => v,
        Some(v) => {
            return Err(ConsistencyError::VersionRegression {
                current: existing.version,
                proposed: v,
            }
            .into())
        },
    };

    let driver_text = match &request.driver {
        Some(dir) => {
            let gateway_pem = keys
                .load_private_key(ObjectKind::Gateway, &name)?
                .ok_or_else(|| KeyStoreError::MissingPrivateKey {
                    kind: ObjectKind::Gateway,
                    name: name.clone(),
                })?;
            Some(load_driver(dir, &gateway_pem).map_err(map_driver_error)?)
        },
        None => None,
    };
    let new_driver_hash = match driver_text.as_deref() {
        Some(text) => driver_hash(Some(text)),
        None => existing.driver_hash.clone(),
    };

    let signing_key = signing_key_for(keys, ObjectKind::User, &acting_email)?;

    let mut cert = GatewayCertificate {
        gateway_id: existing.gateway_id,
        gateway_type,
        owner_id: acting_id,
        name: name.clone(),
        host: request.host.clone().unwrap_or_else(|| existing.host.clone()),
        port: request.port.unwrap_or(existing.port),
        public_key,
        version,
        cert_expires,
        caps,
        volume_id: existing.volume_id,
        driver_hash: new_driver_hash,
        signature: String::new(),
    };
    cert.sign_with(&signing_key)?;

    let expands = caps_expanded(existing.caps, caps);
    let third_party = acting_id != existing.owner_id;
    let needs_bundle = expands || third_party;
    debug!(
        gateway = %name,
        expands, third_party, needs_bundle, "gateway update bundle decision"
    );

    let bundle_bytes = if needs_bundle {
        if acting_id != volume_cert.owner_id {
            return Err(ConsistencyError::NotVolumeOwner {
                user: acting_email,
                volume: volume_cert.name,
            }
            .into());
        }
        let bundle = build_trust_bundle(
            config,
            keys,
            &acting_email,
            &volume_cert.name,
            BundleOverride {
                volume_cert: None,
                gateway_cert: Some(&cert),
            },
        )?;
        Some(to_canonical_bytes(&bundle)?)
    } else {
        None
    };

    let kwargs = gateway_kwargs(&cert, driver_text.as_deref(), bundle_bytes.as_deref())?;
    Ok(Prepared {
        verb: "update_gateway",
        args: vec![json!(cert.gateway_id)],
        kwargs,
        commit: CommitPlan::StoreGateway {
            private_key: None,
            public_key: None,
            cert,
        },
    })
}

fn prepare_delete(
    config: &ClientConfig,
    keys: &dyn KeyStore,
    request: &GatewayRequest,
) -> Result<Prepared, Error> {
    let name = require_name(request)?;

    let existing: GatewayCertificate = load_certificate(config, ObjectKind::Gateway, &name)?
        .ok_or_else(|| ConsistencyError::CertificateMissing {
            kind: ObjectKind::Gateway,
            name: name.clone(),
        })?;

    let volume_cert = resolve_volume(config, request, Some(&existing))?;
    let (acting_email, acting_id) = resolve_acting_user(config, request, Some(&existing))?;

    let mut cert = existing.clone();
    cert.version = existing.version + 1;
    cert.signature = String::new();
    let signing_key = signing_key_for(keys, ObjectKind::User, &acting_email)?;
    cert.sign_with(&signing_key)?;

    // Deletion always regenerates the bundle.
    if acting_id != volume_cert.owner_id {
        return Err(ConsistencyError::NotVolumeOwner {
            user: acting_email,
            volume: volume_cert.name,
        }
        .into());
    }
    let bundle = build_trust_bundle(
        config,
        keys,
        &acting_email,
        &volume_cert.name,
        BundleOverride {
            volume_cert: None,
            gateway_cert: Some(&cert),
        },
    )?;

    let kwargs = gateway_kwargs(&cert, None, Some(&to_canonical_bytes(&bundle)?))?;
    Ok(Prepared {
        verb: "delete_gateway",
        args: vec![json!(cert.gateway_id)],
        kwargs,
        commit: CommitPlan::DeleteGateway {
            name,
            gateway_id: cert.gateway_id,
        },
    })
}
