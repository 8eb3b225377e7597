//! SHA-256 digests over canonical bytes.

use sha2::{Digest as _, Sha256};

/// Size of a SHA-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Type alias for a 32-byte digest.
pub type Digest = [u8; DIGEST_SIZE];

/// Computes the SHA-256 digest of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes the SHA-256 digest of `data` and hex-encodes it.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_empty_input_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(sha256(b"keel"), sha256(b"keel"));
        assert_ne!(sha256(b"keel"), sha256(b"leek"));
    }
}
