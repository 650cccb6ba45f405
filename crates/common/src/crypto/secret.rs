//! Content encryption using AES-256-GCM
//!
//! Every encrypted file gets its own [`Secret`] and a fresh random [`Nonce`].
//! Key, nonce and (for password mode) [`Salt`] are kept apart from the
//! ciphertext so the key material can live in the keyring while only the
//! ciphertext ever reaches a storage backend.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce as GcmNonce,
};
use serde::{Deserialize, Serialize};

/// Size of AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;
/// Size of AES-256 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of the PBKDF2 salt in bytes (128 bits)
pub const SALT_SIZE: usize = 16;
/// Size of the GCM authentication tag appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// Authentication failed. Wrong key, wrong password, truncation and
    /// tampering are deliberately indistinguishable.
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("invalid {kind} size, expected {expected}, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("failed to generate random bytes: {0}")]
    Rng(String),
}

/// Fill a fixed size buffer from the system CSPRNG.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], SecretError> {
    let mut buff = [0u8; N];
    getrandom::getrandom(&mut buff).map_err(|e| SecretError::Rng(e.to_string()))?;
    Ok(buff)
}

fn copy_exact<const N: usize>(kind: &'static str, data: &[u8]) -> Result<[u8; N], SecretError> {
    if data.len() != N {
        return Err(SecretError::InvalidLength {
            kind,
            expected: N,
            actual: data.len(),
        });
    }
    let mut buff = [0u8; N];
    buff.copy_from_slice(data);
    Ok(buff)
}

/// Algorithm tag recorded alongside key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
}

/// A 96-bit AES-GCM nonce. Generated fresh for every encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    pub fn generate() -> Result<Self, SecretError> {
        Ok(Self(random_bytes()?))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        Ok(Self(copy_exact("nonce", data)?))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; NONCE_SIZE]> for Nonce {
    fn from(bytes: [u8; NONCE_SIZE]) -> Self {
        Nonce(bytes)
    }
}

/// A 128-bit PBKDF2 salt. Generated fresh for every password-protected file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn generate() -> Result<Self, SecretError> {
        Ok(Self(random_bytes()?))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        Ok(Self(copy_exact("salt", data)?))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; SALT_SIZE]> for Salt {
    fn from(bytes: [u8; SALT_SIZE]) -> Self {
        Salt(bytes)
    }
}

/// A 256-bit symmetric key for content encryption
///
/// The ciphertext format is plain AES-256-GCM output: `encrypted(plaintext) || tag (16 bytes)`.
/// The nonce is not embedded and must be supplied on decryption.
///
/// # Examples
///
/// ```ignore
/// let secret = Secret::generate()?;
/// let nonce = Nonce::generate()?;
///
/// let ciphertext = secret.encrypt(&nonce, b"sensitive data")?;
/// let recovered = secret.decrypt(&nonce, &ciphertext)?;
/// assert_eq!(b"sensitive data", &recovered[..]);
/// ```
#[derive(PartialEq, Eq, Clone)]
pub struct Secret([u8; SECRET_SIZE]);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Result<Self, SecretError> {
        Ok(Self(random_bytes()?))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        Ok(Self(copy_exact("secret", data)?))
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.bytes()))
    }

    /// Encrypt data using AES-256-GCM under the given nonce.
    ///
    /// Callers must never reuse a nonce with the same secret.
    pub fn encrypt(&self, nonce: &Nonce, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        self.cipher()
            .encrypt(GcmNonce::from_slice(nonce.bytes()), data)
            .map_err(|_| SecretError::EncryptionFailed)
    }

    /// Decrypt and authenticate data using AES-256-GCM.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::DecryptionFailed`] for any authentication failure.
    pub fn decrypt(&self, nonce: &Nonce, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < TAG_SIZE {
            return Err(SecretError::DecryptionFailed);
        }
        self.cipher()
            .decrypt(GcmNonce::from_slice(nonce.bytes()), data)
            .map_err(|_| SecretError::DecryptionFailed)
    }
}

/// Key material produced by one encryption.
///
/// Random mode carries the key; password mode carries the salt instead and the
/// key is re-derived from the password when needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub algorithm: Algorithm,
    pub key: Option<Secret>,
    pub nonce: Nonce,
    pub salt: Option<Salt>,
}

impl KeyMaterial {
    pub fn random(key: Secret, nonce: Nonce) -> Self {
        Self {
            algorithm: Algorithm::Aes256Gcm,
            key: Some(key),
            nonce,
            salt: None,
        }
    }

    pub fn password(salt: Salt, nonce: Nonce) -> Self {
        Self {
            algorithm: Algorithm::Aes256Gcm,
            key: None,
            nonce,
            salt: Some(salt),
        }
    }

    pub fn is_password_protected(&self) -> bool {
        self.salt.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_secret_encrypt_decrypt() {
        let secret = Secret::generate().unwrap();
        let nonce = Nonce::generate().unwrap();
        let data = b"hello world, this is a test message for encryption";

        let encrypted = secret.encrypt(&nonce, data).unwrap();
        assert_eq!(encrypted.len(), data.len() + TAG_SIZE);
        let decrypted = secret.decrypt(&nonce, &encrypted).unwrap();

        assert_eq!(data.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_size_validation() {
        assert!(Secret::from_slice(&[1u8; 16]).is_err());
        assert!(Secret::from_slice(&[1u8; 64]).is_err());
        assert!(Secret::from_slice(&[1u8; SECRET_SIZE]).is_ok());

        assert!(Nonce::from_slice(&[0u8; 16]).is_err());
        assert!(Nonce::from_slice(&[0u8; NONCE_SIZE]).is_ok());

        assert!(Salt::from_slice(&[0u8; 12]).is_err());
        assert!(Salt::from_slice(&[0u8; SALT_SIZE]).is_ok());
    }

    #[test]
    fn test_wrong_key_fails_generically() {
        let secret = Secret::generate().unwrap();
        let other = Secret::generate().unwrap();
        let nonce = Nonce::generate().unwrap();

        let encrypted = secret.encrypt(&nonce, b"top secret").unwrap();
        let result = other.decrypt(&nonce, &encrypted);
        assert!(matches!(result, Err(SecretError::DecryptionFailed)));
    }

    #[test]
    fn test_tampering_detected() {
        let secret = Secret::generate().unwrap();
        let nonce = Nonce::generate().unwrap();

        let mut encrypted = secret.encrypt(&nonce, b"test data for integrity check").unwrap();
        encrypted[3] ^= 0xFF;
        assert!(matches!(
            secret.decrypt(&nonce, &encrypted),
            Err(SecretError::DecryptionFailed)
        ));

        // Truncated below the tag size
        assert!(matches!(
            secret.decrypt(&nonce, &encrypted[..4]),
            Err(SecretError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_empty_data_encryption() {
        let secret = Secret::generate().unwrap();
        let nonce = Nonce::generate().unwrap();

        let encrypted = secret.encrypt(&nonce, b"").unwrap();
        assert_eq!(encrypted.len(), TAG_SIZE);
        assert!(secret.decrypt(&nonce, &encrypted).unwrap().is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let secret = Secret::from([7u8; SECRET_SIZE]);
        assert_eq!(format!("{:?}", secret), "Secret(..)");
    }
}
