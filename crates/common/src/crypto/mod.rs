//! Cryptographic primitives for Tessera
//!
//! - **Encryption**: AES-256-GCM with a per-file random key and a fresh 96-bit
//!   nonce for every encryption
//! - **Password mode**: keys derived with PBKDF2-HMAC-SHA256 (100,000
//!   iterations) from the password and a per-file 128-bit salt
//! - **Fingerprints**: plain SHA-256 for open content, BLAKE3 keyed hashes
//!   ("blinded") for private content
//! - **Execution**: everything runs on background worker threads behind
//!   [`CryptoEngine`]
//!
//! Authentication failures of any kind collapse into a single
//! `DecryptionFailed` outcome so callers can't tell a wrong password from a
//! corrupted object.

mod digest;
mod engine;
mod password;
mod secret;

pub use digest::{blinded_hash, hash, Digest, DIGEST_SIZE};
pub use engine::{
    CryptoEngine, CryptoError, CryptoOperation, CryptoOutput, CryptoRequest, CryptoResponse,
    Sealed,
};
pub use password::{derive_key, PasswordEnvelope, PBKDF2_ITERATIONS};
pub(crate) use secret::random_bytes;
pub use secret::{
    Algorithm, KeyMaterial, Nonce, Salt, Secret, SecretError, NONCE_SIZE, SALT_SIZE, SECRET_SIZE,
    TAG_SIZE,
};
