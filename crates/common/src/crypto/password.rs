//! Password based key derivation and the self-describing password envelope.

use sha2::Sha256;

use super::secret::{Nonce, Salt, Secret, SecretError, NONCE_SIZE, SALT_SIZE, SECRET_SIZE};

/// PBKDF2-HMAC-SHA256 iteration count for password derived keys
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derive an AES-256 key from a password and salt.
pub fn derive_key(password: &str, salt: &Salt) -> Secret {
    let mut key = [0u8; SECRET_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.bytes(), PBKDF2_ITERATIONS, &mut key);
    Secret::from(key)
}

/// Framing for password-protected objects: `salt (16) || nonce (12) || ciphertext`.
///
/// Anyone holding the password can open an envelope without a keyring entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordEnvelope<'a> {
    pub salt: Salt,
    pub nonce: Nonce,
    pub ciphertext: &'a [u8],
}

impl<'a> PasswordEnvelope<'a> {
    pub const HEADER_SIZE: usize = SALT_SIZE + NONCE_SIZE;

    pub fn encode(salt: &Salt, nonce: &Nonce, ciphertext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_SIZE + ciphertext.len());
        out.extend_from_slice(salt.bytes());
        out.extend_from_slice(nonce.bytes());
        out.extend_from_slice(ciphertext);
        out
    }

    /// Split an envelope into its parts.
    ///
    /// A short buffer is reported as [`SecretError::DecryptionFailed`] so a
    /// malformed object is indistinguishable from a wrong password.
    pub fn decode(data: &'a [u8]) -> Result<Self, SecretError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(SecretError::DecryptionFailed);
        }
        let salt = Salt::from_slice(&data[..SALT_SIZE])?;
        let nonce = Nonce::from_slice(&data[SALT_SIZE..Self::HEADER_SIZE])?;
        Ok(Self {
            salt,
            nonce,
            ciphertext: &data[Self::HEADER_SIZE..],
        })
    }
}
