//! Local identity index: `(kind, name) ↔ numeric id` plus certificate files.
//!
//! Every live entity has a `<name>.id` record holding its numeric id as
//! decimal text, a `<name>.cert` certificate file, and a hard-linked
//! `<id>.cert` alias so certificates are reachable by id in O(1). The
//! reverse direction — id to name — has no index and is served by a full
//! scan of the `.id` records; it is an explicit cold path.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ClientConfig, ObjectKind};

/// Errors from local certificate/id storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A local state file could not be read or written.
    #[error("local state I/O failure at {path}: {source}")]
    Io {
        /// The path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An `.id` record did not hold decimal text.
    #[error("corrupt id record at {path}")]
    CorruptIdRecord {
        /// The path of the corrupt record.
        path: String,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Looks up the numeric id recorded for `(kind, name)`.
///
/// Returns `Ok(None)` when no record exists.
///
/// # Errors
///
/// Returns [`StorageError::Io`] on read failure or
/// [`StorageError::CorruptIdRecord`] if the record is not decimal text.
pub fn lookup_id(
    config: &ClientConfig,
    kind: ObjectKind,
    name: &str,
) -> Result<Option<u64>, StorageError> {
    let path = config.object_file_path(kind, &format!("{name}.id"));
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.display().to_string(),
                source,
            })
        },
    };
    text.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| StorageError::CorruptIdRecord {
            path: path.display().to_string(),
        })
}

/// Records the numeric id for `(kind, name)`.
///
/// # Errors
///
/// Returns [`StorageError::Io`] on write failure.
pub fn store_id(
    config: &ClientConfig,
    kind: ObjectKind,
    name: &str,
    id: u64,
) -> Result<(), StorageError> {
    let path = config.object_file_path(kind, &format!("{name}.id"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(&path))?;
    }
    std::fs::write(&path, format!("{id}\n")).map_err(io_err(&path))
}

/// Removes the id record for `(kind, name)`. Removing an absent record is
/// not an error.
///
/// # Errors
///
/// Returns [`StorageError::Io`] on removal failure.
pub fn remove_id(config: &ClientConfig, kind: ObjectKind, name: &str) -> Result<(), StorageError> {
    let path = config.object_file_path(kind, &format!("{name}.id"));
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Finds the name recorded for a numeric id by scanning every `.id` record
/// of the kind.
///
/// This is O(n) in the number of records and intentionally stays that way;
/// reserve it for cold paths. Unparsable records are skipped.
///
/// # Errors
///
/// Returns [`StorageError::Io`] if the directory cannot be listed.
pub fn lookup_name_by_id(
    config: &ClientConfig,
    kind: ObjectKind,
    id: u64,
) -> Result<Option<String>, StorageError> {
    let dir = config.object_dir(kind);
    warn!(kind = %kind, id, "reverse id lookup scans every .id record; cold path only");

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: dir.display().to_string(),
                source,
            })
        },
    };

    for entry in entries {
        let entry = entry.map_err(io_err(&dir))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(|f| f.strip_suffix(".id")) else {
            continue;
        };
        match lookup_id(config, kind, name)? {
            Some(recorded) if recorded == id => return Ok(Some(name.to_string())),
            _ => {},
        }
    }
    Ok(None)
}

/// Hard-links `<id>.cert` to `<name>.cert` so the certificate is reachable
/// by numeric id.
///
/// # Errors
///
/// Returns [`StorageError::Io`] if the link cannot be created.
pub fn link_cert_by_id(
    config: &ClientConfig,
    kind: ObjectKind,
    id: u64,
    name: &str,
) -> Result<(), StorageError> {
    let cert_path = config.object_file_path(kind, &format!("{name}.cert"));
    let id_path = config.object_file_path(kind, &format!("{id}.cert"));
    // Re-linking after a cert rewrite must repoint the alias.
    match std::fs::remove_file(&id_path) {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(source) => {
            return Err(StorageError::Io {
                path: id_path.display().to_string(),
                source,
            })
        },
    }
    std::fs::hard_link(&cert_path, &id_path).map_err(io_err(&id_path))?;
    debug!(kind = %kind, id, name, "linked certificate by id");
    Ok(())
}

/// Removes the `<id>.cert` hard link. Removing an absent link is not an
/// error.
///
/// # Errors
///
/// Returns [`StorageError::Io`] on removal failure.
pub fn unlink_cert_by_id(
    config: &ClientConfig,
    kind: ObjectKind,
    id: u64,
) -> Result<(), StorageError> {
    let id_path = config.object_file_path(kind, &format!("{id}.cert"));
    match std::fs::remove_file(&id_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Io {
            path: id_path.display().to_string(),
            source,
        }),
    }
}

/// Reads a certificate's serialized bytes by name. Returns `Ok(None)` when
/// no certificate is on file.
///
/// # Errors
///
/// Returns [`StorageError::Io`] on read failure.
pub fn load_cert_bytes(
    config: &ClientConfig,
    kind: ObjectKind,
    name: &str,
) -> Result<Option<Vec<u8>>, StorageError> {
    let path = config.object_file_path(kind, &format!("{name}.cert"));
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Writes a certificate's serialized bytes under its name.
///
/// # Errors
///
/// Returns [`StorageError::Io`] on write failure.
pub fn store_cert_bytes(
    config: &ClientConfig,
    kind: ObjectKind,
    name: &str,
    bytes: &[u8],
) -> Result<(), StorageError> {
    let path = config.object_file_path(kind, &format!("{name}.cert"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(&path))?;
    }
    std::fs::write(&path, bytes).map_err(io_err(&path))
}

/// Removes a certificate file by name. Removing an absent certificate is
/// not an error.
///
/// # Errors
///
/// Returns [`StorageError::Io`] on removal failure.
pub fn remove_cert(
    config: &ClientConfig,
    kind: ObjectKind,
    name: &str,
) -> Result<(), StorageError> {
    let path = config.object_file_path(kind, &format!("{name}.cert"));
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Lists the names of all certificates on file for a kind.
///
/// Hard-linked `<id>.cert` aliases are included; callers that need distinct
/// entities should deduplicate on the id field of the loaded certificate.
///
/// # Errors
///
/// Returns [`StorageError::Io`] if the directory cannot be listed.
pub fn list_cert_names(
    config: &ClientConfig,
    kind: ObjectKind,
) -> Result<Vec<String>, StorageError> {
    let dir = config.object_dir(kind);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StorageError::Io {
                path: dir.display().to_string(),
                source,
            })
        },
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err(&dir))?;
        if let Some(name) = entry
            .file_name()
            .to_str()
            .and_then(|f| f.strip_suffix(".cert"))
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> (tempfile::TempDir, ClientConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new(dir.path(), "admin@example.com");
        config.ensure_dirs().unwrap();
        (dir, config)
    }

    #[test]
    fn id_records_round_trip() {
        let (_dir, config) = test_config();
        assert!(lookup_id(&config, ObjectKind::User, "alice").unwrap().is_none());

        store_id(&config, ObjectKind::User, "alice", 42).unwrap();
        assert_eq!(lookup_id(&config, ObjectKind::User, "alice").unwrap(), Some(42));

        remove_id(&config, ObjectKind::User, "alice").unwrap();
        assert!(lookup_id(&config, ObjectKind::User, "alice").unwrap().is_none());
        // removing again is fine
        remove_id(&config, ObjectKind::User, "alice").unwrap();
    }

    #[test]
    fn corrupt_id_records_are_errors() {
        let (_dir, config) = test_config();
        std::fs::write(config.object_file_path(ObjectKind::User, "bob.id"), "junk\n").unwrap();
        assert!(matches!(
            lookup_id(&config, ObjectKind::User, "bob").unwrap_err(),
            StorageError::CorruptIdRecord { .. }
        ));
    }

    #[test]
    fn reverse_lookup_scans_records() {
        let (_dir, config) = test_config();
        store_id(&config, ObjectKind::Volume, "data", 7).unwrap();
        store_id(&config, ObjectKind::Volume, "scratch", 9).unwrap();

        assert_eq!(
            lookup_name_by_id(&config, ObjectKind::Volume, 9).unwrap(),
            Some("scratch".to_string())
        );
        assert_eq!(lookup_name_by_id(&config, ObjectKind::Volume, 8).unwrap(), None);
    }

    #[test]
    fn cert_is_reachable_by_name_and_id() {
        let (_dir, config) = test_config();
        store_cert_bytes(&config, ObjectKind::Volume, "data", b"{\"v\":1}").unwrap();
        link_cert_by_id(&config, ObjectKind::Volume, 7, "data").unwrap();

        let by_id = std::fs::read(config.object_file_path(ObjectKind::Volume, "7.cert")).unwrap();
        assert_eq!(by_id, b"{\"v\":1}");

        // Rewriting and relinking repoints the alias.
        store_cert_bytes(&config, ObjectKind::Volume, "data", b"{\"v\":2}").unwrap();
        link_cert_by_id(&config, ObjectKind::Volume, 7, "data").unwrap();
        let by_id = std::fs::read(config.object_file_path(ObjectKind::Volume, "7.cert")).unwrap();
        assert_eq!(by_id, b"{\"v\":2}");

        unlink_cert_by_id(&config, ObjectKind::Volume, 7).unwrap();
        assert!(!config.object_file_path(ObjectKind::Volume, "7.cert").exists());
        assert!(config.object_file_path(ObjectKind::Volume, "data.cert").exists());
    }

    #[test]
    fn list_cert_names_ignores_other_files() {
        let (_dir, config) = test_config();
        store_cert_bytes(&config, ObjectKind::Gateway, "gw-a", b"{}").unwrap();
        store_cert_bytes(&config, ObjectKind::Gateway, "gw-b", b"{}").unwrap();
        store_id(&config, ObjectKind::Gateway, "gw-a", 1).unwrap();

        assert_eq!(
            list_cert_names(&config, ObjectKind::Gateway).unwrap(),
            vec!["gw-a".to_string(), "gw-b".to_string()]
        );
    }
}
