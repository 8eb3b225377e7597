//! Cryptographic primitives for certificate issuance.
//!
//! - **SHA-256 digests** over canonical bytes ([`hash`])
//! - **Ed25519 keypairs** with PKCS#8/SPKI PEM encoding and the
//!   `auto`/PEM-literal/path key-source resolution ([`keys`])
//! - **Deterministic signatures**: sign the digest of a record with its
//!   `signature` field cleared, embed the base64 result ([`sign`])

mod hash;
mod keys;
mod sign;

pub use hash::{sha256, sha256_hex, Digest, DIGEST_SIZE};
pub use keys::{
    generate_keypair, parse_or_generate, parse_public_key, public_key_pem, validate_private_key,
    KeyError, KeyMaterial, AUTO_KEY_TOKEN, OBJECT_KEY_BITS,
};
pub use sign::{
    parse_signature_b64, sign_bytes_b64, verify_bytes_b64, SignatureError, SIGNATURE_SIZE,
};
