//! Client configuration and on-disk object layout.
//!
//! The engine keeps all local state under a single state directory, one
//! subdirectory per object kind (`user/`, `volume/`, `gateway/`), with
//! certificates as `<name>.cert`, id records as `<name>.id`, and hard-linked
//! `<id>.cert` aliases. The gateway directory also carries `types.conf`,
//! mapping human-readable gateway type aliases to integer type codes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kinds of objects the control plane issues certificates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A user account.
    User,
    /// A volume.
    Volume,
    /// A gateway process within a volume.
    Gateway,
}

impl ObjectKind {
    /// Directory / key-store name for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Volume => "volume",
            Self::Gateway => "gateway",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from configuration loading and the type-alias table.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A line in `types.conf` is not of the `alias=integer` form.
    #[error("invalid gateway type alias line '{line}'")]
    InvalidTypeAlias {
        /// The offending line.
        line: String,
    },
}

/// Client configuration: where local state lives and who is acting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Root of the local certificate/id/key state tree.
    pub state_dir: PathBuf,

    /// The acting identity's email. User create/delete/reset operations are
    /// signed by this identity's key (the administrator).
    pub username: String,
}

impl ClientConfig {
    /// Creates a configuration rooted at `state_dir` acting as `username`.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>, username: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            username: username.into(),
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Directory holding all records for an object kind.
    #[must_use]
    pub fn object_dir(&self, kind: ObjectKind) -> PathBuf {
        self.state_dir.join(kind.as_str())
    }

    /// Path of a named record within an object kind's directory.
    #[must_use]
    pub fn object_file_path(&self, kind: ObjectKind, filename: &str) -> PathBuf {
        self.object_dir(kind).join(filename)
    }

    /// Ensures the per-kind state directories exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for kind in [ObjectKind::User, ObjectKind::Volume, ObjectKind::Gateway] {
            let dir = self.object_dir(kind);
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Loads the gateway type-alias table from `gateway/types.conf`.
///
/// The file holds `alias=integer` lines; `#`-prefixed comments and blank
/// lines are ignored. A missing file yields an empty table; a malformed line
/// is a hard error.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file exists but cannot be read, or
/// [`ConfigError::InvalidTypeAlias`] for a malformed line.
pub fn load_gateway_type_aliases(
    config: &ClientConfig,
) -> Result<BTreeMap<String, u32>, ConfigError> {
    let path = config.object_file_path(ObjectKind::Gateway, "types.conf");
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut aliases = BTreeMap::new();
    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let alias = parts.next().unwrap_or_default().trim();
        let value = parts.next().map(str::trim);
        let type_code = match value {
            Some(v) if !alias.is_empty() && !v.contains('=') => v.parse::<u32>().ok(),
            _ => None,
        };
        let Some(type_code) = type_code else {
            return Err(ConfigError::InvalidTypeAlias {
                line: raw_line.to_string(),
            });
        };
        aliases.insert(alias.to_string(), type_code);
    }
    Ok(aliases)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_types(content: &str) -> (tempfile::TempDir, ClientConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new(dir.path(), "admin@example.com");
        config.ensure_dirs().unwrap();
        std::fs::write(
            config.object_file_path(ObjectKind::Gateway, "types.conf"),
            content,
        )
        .unwrap();
        (dir, config)
    }

    #[test]
    fn parses_toml_config() {
        let config =
            ClientConfig::from_toml("state_dir = \"/tmp/keel\"\nusername = \"op@example.com\"\n")
                .unwrap();
        assert_eq!(config.username, "op@example.com");
        assert_eq!(config.state_dir, PathBuf::from("/tmp/keel"));
    }

    #[test]
    fn object_paths_are_per_kind() {
        let config = ClientConfig::new("/srv/keel", "admin@example.com");
        assert_eq!(
            config.object_file_path(ObjectKind::Volume, "data.cert"),
            PathBuf::from("/srv/keel/volume/data.cert")
        );
    }

    #[test]
    fn type_aliases_parse_with_comments_and_blanks() {
        let (_dir, config) = config_with_types("# gateway types\n\nUG=1\nRG = 2\nAG=3\n");
        let aliases = load_gateway_type_aliases(&config).unwrap();
        assert_eq!(aliases.get("UG"), Some(&1));
        assert_eq!(aliases.get("RG"), Some(&2));
        assert_eq!(aliases.get("AG"), Some(&3));
    }

    #[test]
    fn missing_types_file_yields_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new(dir.path(), "admin@example.com");
        config.ensure_dirs().unwrap();
        assert!(load_gateway_type_aliases(&config).unwrap().is_empty());
    }

    #[test]
    fn malformed_alias_lines_are_hard_errors() {
        for bad in ["UG", "UG=1=2", "UG=banana", "=3"] {
            let (_dir, config) = config_with_types(bad);
            assert!(matches!(
                load_gateway_type_aliases(&config).unwrap_err(),
                ConfigError::InvalidTypeAlias { .. }
            ));
        }
    }
}
