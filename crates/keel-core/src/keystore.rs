//! Key/value storage for PEM-encoded entity keys.
//!
//! The engine never owns key persistence directly; it talks to a [`KeyStore`]
//! keyed by `(object kind, name)`. The [`FsKeyStore`] implementation keeps
//! keys under `<root>/<kind>/<name>.pkey` (private, mode 0600) and
//! `<root>/<kind>/<name>.pub` (public).

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ObjectKind;

/// Errors from key storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyStoreError {
    /// No private key is on file for the required signer.
    #[error("no private key on file for {kind} '{name}'")]
    MissingPrivateKey {
        /// Object kind.
        kind: ObjectKind,
        /// Object name.
        name: String,
    },

    /// No public key is on file for the named entity.
    #[error("no public key on file for {kind} '{name}'")]
    MissingPublicKey {
        /// Object kind.
        kind: ObjectKind,
        /// Object name.
        name: String,
    },

    /// The backing store failed.
    #[error("key store I/O failure at {path}: {source}")]
    Io {
        /// The path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Key/value store for PEM-encoded keys, keyed by `(object kind, name)`.
///
/// `load_*` returns `Ok(None)` when no key is on file; callers that require
/// the key promote that to [`KeyStoreError::MissingPrivateKey`] /
/// [`KeyStoreError::MissingPublicKey`].
pub trait KeyStore {
    /// Loads a private key, if present.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] on backend failure.
    fn load_private_key(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<String>, KeyStoreError>;

    /// Stores a private key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] on backend failure.
    fn store_private_key(&self, kind: ObjectKind, name: &str, pem: &str)
        -> Result<(), KeyStoreError>;

    /// Erases a private key. Erasing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] on backend failure.
    fn erase_private_key(&self, kind: ObjectKind, name: &str) -> Result<(), KeyStoreError>;

    /// Loads a public key, if present.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] on backend failure.
    fn load_public_key(&self, kind: ObjectKind, name: &str)
        -> Result<Option<String>, KeyStoreError>;

    /// Stores a public key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] on backend failure.
    fn store_public_key(&self, kind: ObjectKind, name: &str, pem: &str)
        -> Result<(), KeyStoreError>;

    /// Erases a public key. Erasing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] on backend failure.
    fn erase_public_key(&self, kind: ObjectKind, name: &str) -> Result<(), KeyStoreError>;
}

/// Filesystem-backed key store.
#[derive(Debug, Clone)]
pub struct FsKeyStore {
    root: PathBuf,
}

impl FsKeyStore {
    /// Creates a store rooted at `root` (typically `<state_dir>/keys`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, kind: ObjectKind, name: &str, suffix: &str) -> PathBuf {
        self.root.join(kind.as_str()).join(format!("{name}.{suffix}"))
    }

    fn read_key(path: &Path) -> Result<Option<String>, KeyStoreError> {
        match std::fs::read_to_string(path) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(KeyStoreError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn write_key(path: &Path, pem: &str, private: bool) -> Result<(), KeyStoreError> {
        let io_err = |source| KeyStoreError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, pem).map_err(io_err)?;
        #[cfg(unix)]
        if private {
            use std::os::unix::fs::PermissionsExt as _;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        #[cfg(not(unix))]
        let _ = private;
        Ok(())
    }

    fn erase_key(path: &Path) -> Result<(), KeyStoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(KeyStoreError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

impl KeyStore for FsKeyStore {
    fn load_private_key(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<String>, KeyStoreError> {
        Self::read_key(&self.key_path(kind, name, "pkey"))
    }

    fn store_private_key(
        &self,
        kind: ObjectKind,
        name: &str,
        pem: &str,
    ) -> Result<(), KeyStoreError> {
        Self::write_key(&self.key_path(kind, name, "pkey"), pem, true)
    }

    fn erase_private_key(&self, kind: ObjectKind, name: &str) -> Result<(), KeyStoreError> {
        Self::erase_key(&self.key_path(kind, name, "pkey"))
    }

    fn load_public_key(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<String>, KeyStoreError> {
        Self::read_key(&self.key_path(kind, name, "pub"))
    }

    fn store_public_key(
        &self,
        kind: ObjectKind,
        name: &str,
        pem: &str,
    ) -> Result<(), KeyStoreError> {
        Self::write_key(&self.key_path(kind, name, "pub"), pem, false)
    }

    fn erase_public_key(&self, kind: ObjectKind, name: &str) -> Result<(), KeyStoreError> {
        Self::erase_key(&self.key_path(kind, name, "pub"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_load_erase_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKeyStore::new(dir.path());

        assert!(store
            .load_private_key(ObjectKind::User, "alice@example.com")
            .unwrap()
            .is_none());

        store
            .store_private_key(ObjectKind::User, "alice@example.com", "PEM-PRIVATE")
            .unwrap();
        store
            .store_public_key(ObjectKind::User, "alice@example.com", "PEM-PUBLIC")
            .unwrap();

        assert_eq!(
            store
                .load_private_key(ObjectKind::User, "alice@example.com")
                .unwrap()
                .as_deref(),
            Some("PEM-PRIVATE")
        );
        assert_eq!(
            store
                .load_public_key(ObjectKind::User, "alice@example.com")
                .unwrap()
                .as_deref(),
            Some("PEM-PUBLIC")
        );

        store
            .erase_private_key(ObjectKind::User, "alice@example.com")
            .unwrap();
        store
            .erase_public_key(ObjectKind::User, "alice@example.com")
            .unwrap();
        assert!(store
            .load_private_key(ObjectKind::User, "alice@example.com")
            .unwrap()
            .is_none());

        // erasing again is not an error
        store
            .erase_private_key(ObjectKind::User, "alice@example.com")
            .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn private_keys_are_not_world_readable() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let store = FsKeyStore::new(dir.path());
        store
            .store_private_key(ObjectKind::Gateway, "gw-01", "PEM")
            .unwrap();

        let path = dir.path().join("gateway").join("gw-01.pkey");
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn kinds_are_namespaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKeyStore::new(dir.path());
        store
            .store_private_key(ObjectKind::User, "same-name", "USER-KEY")
            .unwrap();
        assert!(store
            .load_private_key(ObjectKind::Gateway, "same-name")
            .unwrap()
            .is_none());
    }
}
