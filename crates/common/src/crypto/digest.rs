//! Content fingerprints.
//!
//! Open files are fingerprinted with a plain SHA-256 digest. Private and
//! password-protected files use a blinded digest: a BLAKE3 keyed hash under a
//! key derived from a local secret, so equal plaintexts only collide for
//! holders of that secret.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Size of every digest in bytes (256 bits)
pub const DIGEST_SIZE: usize = 32;

const BLINDING_CONTEXT: &str = "tessera 2025-01-01 blinded content fingerprint v1";

/// A 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Plain SHA-256 content hash.
pub fn hash(data: &[u8]) -> Digest {
    let out = Sha256::digest(data);
    let mut buff = [0u8; DIGEST_SIZE];
    buff.copy_from_slice(&out);
    Digest(buff)
}

/// Keyed content hash that cannot be correlated without `secret`.
pub fn blinded_hash(data: &[u8], secret: &[u8]) -> Digest {
    let key = blake3::derive_key(BLINDING_CONTEXT, secret);
    Digest(*blake3::keyed_hash(&key, data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_hash_matches_sha256() {
        // SHA-256("abc")
        assert_eq!(
            hash(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_blinded_hash_depends_on_secret() {
        let data = b"same private content";

        let a = blinded_hash(data, b"secret-a");
        let b = blinded_hash(data, b"secret-b");

        assert_eq!(a, blinded_hash(data, b"secret-a"));
        assert_ne!(a, b);
        assert_ne!(a, hash(data));
    }
}
