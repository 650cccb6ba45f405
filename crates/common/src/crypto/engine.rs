//! Background crypto worker.
//!
//! All encryption, decryption and hashing runs on dedicated worker threads,
//! never on the caller's task. Callers talk to the workers through a flume
//! channel using a small request/response contract:
//!
//! - request: `{ id, operation, payload }` ([`CryptoRequest`])
//! - response: `{ id, success, result | error }` ([`CryptoResponse`])
//!
//! Payloads are [`Bytes`], so large buffers cross the boundary by handing
//! over a reference-counted handle instead of copying. A panic while handling
//! a request is caught inside the worker and returned as a structured error.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::digest::{self, Digest};
use super::password::derive_key;
use super::secret::{KeyMaterial, Nonce, Salt, Secret, SecretError};

/// Errors surfaced by the crypto engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Generic authentication failure; the cause is never disclosed
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("crypto operation failed: {0}")]
    Operation(String),
    #[error("failed to spawn crypto worker: {0}")]
    Spawn(String),
    #[error("crypto worker is not running")]
    WorkerUnavailable,
    #[error("crypto worker panicked while handling request {0}")]
    WorkerPanicked(u64),
    #[error("unexpected response from crypto worker")]
    UnexpectedResponse,
}

impl From<SecretError> for CryptoError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::DecryptionFailed => CryptoError::DecryptionFailed,
            other => CryptoError::Operation(other.to_string()),
        }
    }
}

/// Operations understood by the worker, each carrying its payload.
#[derive(Debug)]
pub enum CryptoOperation {
    EncryptRandom {
        data: Bytes,
    },
    EncryptWithPassword {
        data: Bytes,
        password: String,
    },
    Decrypt {
        data: Bytes,
        key: Secret,
        nonce: Nonce,
    },
    DecryptWithPassword {
        data: Bytes,
        password: String,
        salt: Salt,
        nonce: Nonce,
    },
    Hash {
        data: Bytes,
    },
    BlindedHash {
        data: Bytes,
        secret: Vec<u8>,
    },
}

impl CryptoOperation {
    pub fn name(&self) -> &'static str {
        match self {
            CryptoOperation::EncryptRandom { .. } => "encrypt_random",
            CryptoOperation::EncryptWithPassword { .. } => "encrypt_with_password",
            CryptoOperation::Decrypt { .. } => "decrypt",
            CryptoOperation::DecryptWithPassword { .. } => "decrypt_with_password",
            CryptoOperation::Hash { .. } => "hash",
            CryptoOperation::BlindedHash { .. } => "blinded_hash",
        }
    }
}

/// Ciphertext together with the key material needed to open it.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Bytes,
    pub material: KeyMaterial,
}

/// Successful results returned by the worker.
#[derive(Debug, Clone)]
pub enum CryptoOutput {
    Sealed(Sealed),
    Plaintext(Bytes),
    Digest(Digest),
}

/// A request sent to the worker.
#[derive(Debug)]
pub struct CryptoRequest {
    pub id: u64,
    pub operation: CryptoOperation,
    reply: oneshot::Sender<CryptoResponse>,
}

/// The worker's answer to one request.
#[derive(Debug, Clone)]
pub struct CryptoResponse {
    pub id: u64,
    pub outcome: Result<CryptoOutput, CryptoError>,
}

impl CryptoResponse {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Handle to the background crypto workers.
///
/// Cheap to clone; all clones feed the same workers. Workers exit once the
/// last handle is dropped.
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    tx: flume::Sender<CryptoRequest>,
    next_id: Arc<AtomicU64>,
}

impl CryptoEngine {
    /// Spawn an engine backed by a single worker thread.
    pub fn spawn() -> Result<Self, CryptoError> {
        Self::spawn_with_workers(1)
    }

    /// Spawn an engine backed by `workers` threads sharing one queue.
    pub fn spawn_with_workers(workers: usize) -> Result<Self, CryptoError> {
        let (tx, rx) = flume::unbounded::<CryptoRequest>();

        for index in 0..workers.max(1) {
            let rx = rx.clone();
            std::thread::Builder::new()
                .name(format!("tessera-crypto-{}", index))
                .spawn(move || run_worker(rx))
                .map_err(|e| CryptoError::Spawn(e.to_string()))?;
        }

        tracing::debug!(workers = workers.max(1), "crypto engine started");

        Ok(Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Submit an operation and wait for the worker's response.
    pub async fn submit(&self, operation: CryptoOperation) -> CryptoResponse {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();

        let request = CryptoRequest {
            id,
            operation,
            reply,
        };
        if self.tx.send_async(request).await.is_err() {
            return CryptoResponse {
                id,
                outcome: Err(CryptoError::WorkerUnavailable),
            };
        }

        match rx.await {
            Ok(response) if response.id == id => response,
            Ok(_) => CryptoResponse {
                id,
                outcome: Err(CryptoError::UnexpectedResponse),
            },
            Err(_) => CryptoResponse {
                id,
                outcome: Err(CryptoError::WorkerUnavailable),
            },
        }
    }

    /// Encrypt under a freshly generated key and nonce.
    pub async fn encrypt_random(&self, data: Bytes) -> Result<Sealed, CryptoError> {
        match self.submit(CryptoOperation::EncryptRandom { data }).await.outcome? {
            CryptoOutput::Sealed(sealed) => Ok(sealed),
            _ => Err(CryptoError::UnexpectedResponse),
        }
    }

    /// Encrypt under a key derived from `password` and a fresh salt.
    pub async fn encrypt_with_password(
        &self,
        data: Bytes,
        password: &str,
    ) -> Result<Sealed, CryptoError> {
        let operation = CryptoOperation::EncryptWithPassword {
            data,
            password: password.to_string(),
        };
        match self.submit(operation).await.outcome? {
            CryptoOutput::Sealed(sealed) => Ok(sealed),
            _ => Err(CryptoError::UnexpectedResponse),
        }
    }

    pub async fn decrypt(
        &self,
        data: Bytes,
        key: &Secret,
        nonce: &Nonce,
    ) -> Result<Bytes, CryptoError> {
        let operation = CryptoOperation::Decrypt {
            data,
            key: key.clone(),
            nonce: *nonce,
        };
        match self.submit(operation).await.outcome? {
            CryptoOutput::Plaintext(bytes) => Ok(bytes),
            _ => Err(CryptoError::UnexpectedResponse),
        }
    }

    pub async fn decrypt_with_password(
        &self,
        data: Bytes,
        password: &str,
        salt: &Salt,
        nonce: &Nonce,
    ) -> Result<Bytes, CryptoError> {
        let operation = CryptoOperation::DecryptWithPassword {
            data,
            password: password.to_string(),
            salt: *salt,
            nonce: *nonce,
        };
        match self.submit(operation).await.outcome? {
            CryptoOutput::Plaintext(bytes) => Ok(bytes),
            _ => Err(CryptoError::UnexpectedResponse),
        }
    }

    pub async fn hash(&self, data: Bytes) -> Result<Digest, CryptoError> {
        match self.submit(CryptoOperation::Hash { data }).await.outcome? {
            CryptoOutput::Digest(digest) => Ok(digest),
            _ => Err(CryptoError::UnexpectedResponse),
        }
    }

    pub async fn blinded_hash(&self, data: Bytes, secret: &[u8]) -> Result<Digest, CryptoError> {
        let operation = CryptoOperation::BlindedHash {
            data,
            secret: secret.to_vec(),
        };
        match self.submit(operation).await.outcome? {
            CryptoOutput::Digest(digest) => Ok(digest),
            _ => Err(CryptoError::UnexpectedResponse),
        }
    }
}

fn run_worker(rx: flume::Receiver<CryptoRequest>) {
    while let Ok(request) = rx.recv() {
        let CryptoRequest {
            id,
            operation,
            reply,
        } = request;
        let name = operation.name();

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| execute(operation))) {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(id = id, operation = name, "crypto operation panicked");
                Err(CryptoError::WorkerPanicked(id))
            }
        };

        // The caller may have given up waiting
        let _ = reply.send(CryptoResponse { id, outcome });
    }
    tracing::debug!("crypto worker exiting");
}

fn execute(operation: CryptoOperation) -> Result<CryptoOutput, CryptoError> {
    match operation {
        CryptoOperation::EncryptRandom { data } => {
            let key = Secret::generate()?;
            let nonce = Nonce::generate()?;
            let ciphertext = key.encrypt(&nonce, &data)?;
            Ok(CryptoOutput::Sealed(Sealed {
                ciphertext: Bytes::from(ciphertext),
                material: KeyMaterial::random(key, nonce),
            }))
        }
        CryptoOperation::EncryptWithPassword { data, password } => {
            let salt = Salt::generate()?;
            let nonce = Nonce::generate()?;
            let key = derive_key(&password, &salt);
            let ciphertext = key.encrypt(&nonce, &data)?;
            Ok(CryptoOutput::Sealed(Sealed {
                ciphertext: Bytes::from(ciphertext),
                material: KeyMaterial::password(salt, nonce),
            }))
        }
        CryptoOperation::Decrypt { data, key, nonce } => {
            let plaintext = key.decrypt(&nonce, &data)?;
            Ok(CryptoOutput::Plaintext(Bytes::from(plaintext)))
        }
        CryptoOperation::DecryptWithPassword {
            data,
            password,
            salt,
            nonce,
        } => {
            let key = derive_key(&password, &salt);
            let plaintext = key.decrypt(&nonce, &data)?;
            Ok(CryptoOutput::Plaintext(Bytes::from(plaintext)))
        }
        CryptoOperation::Hash { data } => Ok(CryptoOutput::Digest(digest::hash(&data))),
        CryptoOperation::BlindedHash { data, secret } => {
            Ok(CryptoOutput::Digest(digest::blinded_hash(&data, &secret)))
        }
    }
}
