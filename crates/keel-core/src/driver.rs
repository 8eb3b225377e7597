//! Gateway driver bundle loading.
//!
//! A driver is a directory of files shipped to the metadata service as one
//! JSON object: each file becomes a base64-encoded string keyed by its
//! filename. A file named `secrets` is not copied — it is parsed as a JSON
//! string map and sealed under the gateway's keypair instead, so only that
//! gateway can recover it.

use std::collections::BTreeMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

use crate::canonical::{to_canonical_string, CanonicalError};
use crate::crypto::sha256_hex;
use crate::sealing::{seal_secrets, SealError};

/// Filename treated as the driver's secrets map.
pub const SECRETS_FILENAME: &str = "secrets";

/// Errors from driver loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The driver directory or one of its files could not be read.
    #[error("failed to read driver path {path}: {source}")]
    Io {
        /// The path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The `secrets` file is not a JSON string map.
    #[error("secrets file {path} is not a JSON object of strings: {reason}")]
    MalformedSecrets {
        /// The secrets file path.
        path: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Sealing the secrets failed.
    #[error(transparent)]
    Seal(#[from] SealError),

    /// The driver object could not be canonically serialized.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// Loads a driver directory into its serialized wire form.
///
/// Every regular file is base64-encoded under its filename; the `secrets`
/// file is sealed with `gateway_private_pem` instead. A driver directory
/// without a `secrets` file is fine — no `secrets` key is emitted.
///
/// Returns the canonical JSON text of the driver object.
///
/// # Errors
///
/// Returns [`DriverError::Io`] for unreadable paths,
/// [`DriverError::MalformedSecrets`] if the secrets file is not a JSON
/// string map, or a sealing/serialization error.
pub fn load_driver(dir: &Path, gateway_private_pem: &str) -> Result<String, DriverError> {
    let io_err = |path: &Path| {
        let path = path.display().to_string();
        move |source| DriverError::Io { path, source }
    };

    let mut driver: BTreeMap<String, String> = BTreeMap::new();
    let entries = std::fs::read_dir(dir).map_err(io_err(dir))?;
    for entry in entries {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };

        if filename == SECRETS_FILENAME {
            let text = std::fs::read_to_string(&path).map_err(io_err(&path))?;
            let secrets: BTreeMap<String, String> =
                serde_json::from_str(&text).map_err(|e| DriverError::MalformedSecrets {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            let sealed = seal_secrets(&secrets, gateway_private_pem)?;
            driver.insert(filename.to_string(), sealed);
        } else {
            let bytes = std::fs::read(&path).map_err(io_err(&path))?;
            driver.insert(filename.to_string(), BASE64.encode(bytes));
        }
    }

    Ok(to_canonical_string(&driver)?)
}

/// Hex SHA-256 of the driver text, or of the empty string when the gateway
/// carries no driver.
#[must_use]
pub fn driver_hash(driver_text: Option<&str>) -> String {
    sha256_hex(driver_text.unwrap_or_default().as_bytes())
}
