//! Upload and download orchestration.
//!
//! The [`Orchestrator`] owns one of each collaborator: the crypto engine, the
//! keyring, the content index, a primary [`StorageAdapter`], an optional
//! seeder that distributes a second copy, the local cache, and the
//! [`FallbackChain`] used for downloads.
//!
//! Uploads: validate, fingerprint, short-circuit on an index hit, encrypt
//! unless the file is public, upload (seeding concurrently), record key
//! material, record the fingerprint.
//!
//! Downloads: resolve how the file must be opened (keyring entry, then the
//! visibility recorded in the content index, then the caller's hint), fetch
//! through the chain, decrypt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::watch;

use crate::content_index::{ContentIndex, ContentReference};
use crate::crypto::{CryptoEngine, CryptoError, Digest, KeyMaterial, Nonce, PasswordEnvelope, Secret};
use crate::error::TesseraError;
use crate::keyring::{Keyring, KeyringEntry, KeyringError};
use crate::storage::{
    race_with_timeout, AdapterStage, BackendError, BackendKind, FallbackChain, FetchTarget,
    LocalCacheAdapter, Locator, StorageAdapter, UploadMetadata, UploadResult,
};
use crate::visibility::Visibility;

mod state;
mod validation;

use state::Progress;

pub use state::UploadState;
pub use validation::{AllowList, CategoryRule};

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SEED_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// A file handed to [`Orchestrator::upload`].
#[derive(Debug)]
pub struct UploadRequest {
    pub data: Bytes,
    pub file_name: String,
    /// Guessed from `file_name` when absent
    pub mime_type: Option<String>,
    pub visibility: Visibility,
    pub password: Option<String>,
    pub owner: Option<String>,
    progress: Option<watch::Sender<UploadState>>,
}

impl UploadRequest {
    pub fn new(data: impl Into<Bytes>, file_name: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            data: data.into(),
            file_name: file_name.into(),
            mime_type: None,
            visibility,
            password: None,
            owner: None,
            progress: None,
        }
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Report state transitions on `tx`.
    pub fn progress(mut self, tx: watch::Sender<UploadState>) -> Self {
        self.progress = Some(tx);
        self
    }

    fn resolved_mime_type(&self) -> String {
        match &self.mime_type {
            Some(mime_type) => mime_type.clone(),
            None => mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

/// What the caller knows about a file it wants back.
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub id: String,
    pub owner: Option<String>,
    pub password: Option<String>,
    /// Swarm locator; looked up in the content index when absent
    pub locator: Option<String>,
    /// Used only when this device has no keyring entry for the file
    pub visibility: Option<Visibility>,
}

impl DownloadRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

/// Plaintext returned by [`Orchestrator::download`].
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub data: Bytes,
    /// Known only when this device holds a keyring entry
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub visibility: Visibility,
    /// Name of the fallback stage that served the bytes
    pub source: String,
}

/// How downloaded bytes must be opened.
enum Opening {
    Plain,
    Key { key: Secret, nonce: Nonce },
    Password(String),
}

impl Opening {
    fn visibility(&self) -> Visibility {
        match self {
            Opening::Plain => Visibility::Public,
            Opening::Key { .. } => Visibility::Private,
            Opening::Password(_) => Visibility::Password,
        }
    }
}

pub struct OrchestratorBuilder {
    engine: CryptoEngine,
    keyring: Keyring,
    index: ContentIndex,
    primary: Arc<dyn StorageAdapter>,
    seeder: Option<Arc<dyn StorageAdapter>>,
    local_cache: Option<LocalCacheAdapter>,
    chain: Option<FallbackChain>,
    allow_list: AllowList,
    fingerprint_secret: Vec<u8>,
    upload_timeout: Duration,
    seed_timeout: Duration,
    stage_timeout: Duration,
}

impl OrchestratorBuilder {
    /// Distribute a second copy through `seeder` alongside every upload
    pub fn seeder(mut self, seeder: Arc<dyn StorageAdapter>) -> Self {
        self.seeder = Some(seeder);
        self
    }

    pub fn local_cache(mut self, cache: LocalCacheAdapter) -> Self {
        self.local_cache = Some(cache);
        self
    }

    /// Replace the default download chain (primary, then local cache)
    pub fn chain(mut self, chain: FallbackChain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    /// Installation secret mixed into fingerprints of encrypted files
    pub fn fingerprint_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.fingerprint_secret = secret.into();
        self
    }

    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn seed_timeout(mut self, timeout: Duration) -> Self {
        self.seed_timeout = timeout;
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn build(self) -> Orchestrator {
        let chain = match self.chain {
            Some(chain) => chain,
            None => {
                let mut chain = FallbackChain::new();
                chain.push(Arc::new(AdapterStage::new(
                    self.primary.clone(),
                    self.stage_timeout,
                )));
                if let Some(cache) = &self.local_cache {
                    if self.primary.kind() != BackendKind::Local {
                        chain.push(Arc::new(AdapterStage::new(
                            Arc::new(cache.clone()),
                            self.stage_timeout,
                        )));
                    }
                }
                chain
            }
        };

        tracing::debug!(
            primary = %self.primary.kind(),
            seeder = ?self.seeder.as_ref().map(|s| s.kind()),
            stages = ?chain.stage_names(),
            "orchestrator ready"
        );

        Orchestrator {
            engine: self.engine,
            keyring: self.keyring,
            index: self.index,
            primary: self.primary,
            seeder: self.seeder,
            local_cache: self.local_cache,
            chain,
            allow_list: self.allow_list,
            fingerprint_secret: self.fingerprint_secret,
            upload_timeout: self.upload_timeout,
            seed_timeout: self.seed_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    engine: CryptoEngine,
    keyring: Keyring,
    index: ContentIndex,
    primary: Arc<dyn StorageAdapter>,
    seeder: Option<Arc<dyn StorageAdapter>>,
    local_cache: Option<LocalCacheAdapter>,
    chain: FallbackChain,
    allow_list: AllowList,
    fingerprint_secret: Vec<u8>,
    upload_timeout: Duration,
    seed_timeout: Duration,
}

impl Orchestrator {
    pub fn builder(
        engine: CryptoEngine,
        keyring: Keyring,
        index: ContentIndex,
        primary: Arc<dyn StorageAdapter>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            engine,
            keyring,
            index,
            primary,
            seeder: None,
            local_cache: None,
            chain: None,
            allow_list: AllowList::default(),
            fingerprint_secret: Vec::new(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            seed_timeout: DEFAULT_SEED_TIMEOUT,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn index(&self) -> &ContentIndex {
        &self.index
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub async fn upload(&self, mut request: UploadRequest) -> Result<UploadResult, TesseraError> {
        let progress = Progress::new(request.progress.take());
        progress.set(UploadState::Pending);

        let started = Instant::now();
        match self.run_upload(&request, &progress).await {
            Ok(result) => {
                progress.set(UploadState::Completed);
                tracing::info!(
                    id = %result.id,
                    backend = %result.backend,
                    visibility = %result.visibility,
                    size = result.size,
                    deduplicated = result.deduplicated,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "upload complete"
                );
                Ok(result)
            }
            Err(err) => {
                progress.set(UploadState::Failed);
                tracing::debug!(file_name = %request.file_name, error = %err, "upload failed");
                Err(err)
            }
        }
    }

    async fn run_upload(
        &self,
        request: &UploadRequest,
        progress: &Progress,
    ) -> Result<UploadResult, TesseraError> {
        progress.set(UploadState::Validating);
        let password = match request.visibility {
            Visibility::Password => match request.password.as_deref() {
                Some(password) if !password.is_empty() => Some(password),
                _ => {
                    return Err(TesseraError::Validation(
                        "password protected uploads need a password".into(),
                    ))
                }
            },
            _ => None,
        };
        let mime_type = request.resolved_mime_type();
        self.allow_list
            .check(&mime_type, request.data.len() as u64)?;

        progress.set(UploadState::Deduping);
        let fingerprint = self.fingerprint(request, password).await?;
        if let Some(hit) = self.index.lookup(&fingerprint).await? {
            tracing::debug!(id = %hit.id, fingerprint = %fingerprint.to_hex(), "content index hit");
            return Ok(hit.into_result());
        }

        let (payload, material) = match request.visibility {
            Visibility::Public => (request.data.clone(), None),
            Visibility::Private => {
                progress.set(UploadState::Encrypting);
                let sealed = self.engine.encrypt_random(request.data.clone()).await?;
                (sealed.ciphertext, Some(sealed.material))
            }
            Visibility::Password => {
                progress.set(UploadState::Encrypting);
                let password = password.unwrap_or_default();
                let sealed = self
                    .engine
                    .encrypt_with_password(request.data.clone(), password)
                    .await?;
                let salt = sealed.material.salt.ok_or_else(|| {
                    CryptoError::Operation("password encryption produced no salt".into())
                })?;
                let envelope = PasswordEnvelope::encode(&salt, &sealed.material.nonce, &sealed.ciphertext);
                (Bytes::from(envelope), Some(sealed.material))
            }
        };

        progress.set(UploadState::Uploading);
        let metadata = UploadMetadata {
            file_name: request.file_name.clone(),
            mime_type: mime_type.clone(),
            visibility: request.visibility,
        };
        let (uploaded, seeded) = tokio::join!(
            race_with_timeout(
                "primary upload",
                self.upload_timeout,
                self.primary.upload(payload.clone(), &metadata),
            ),
            self.seed(payload.clone(), &metadata, progress),
        );
        let mut result = uploaded?;
        if result.locator.is_none() {
            result.locator = seeded;
        }

        if let Some(material) = &material {
            if let Err(err) = self
                .record_key(&result.id, material, request, &mime_type)
                .await
            {
                // an existing entry still owns the stored object
                if !matches!(err, TesseraError::Keyring(KeyringError::AlreadyExists(_))) {
                    self.compensate(&result.id).await;
                }
                return Err(err);
            }
        }

        if let Err(err) = self
            .index
            .store(&fingerprint, &ContentReference::from(&result))
            .await
        {
            tracing::warn!(id = %result.id, error = %err, "failed to record fingerprint");
        }

        self.write_back(&result.id, payload).await;
        Ok(result)
    }

    /// Plain hash for public files; blinded hash for encrypted ones.
    ///
    /// The blinding covers visibility, owner and password so identical bytes
    /// uploaded under different access rules never share a reference.
    async fn fingerprint(
        &self,
        request: &UploadRequest,
        password: Option<&str>,
    ) -> Result<Digest, TesseraError> {
        if !request.visibility.is_encrypted() {
            return Ok(self.engine.hash(request.data.clone()).await?);
        }

        let mut scope = self.fingerprint_secret.clone();
        scope.extend_from_slice(request.visibility.as_str().as_bytes());
        scope.push(0);
        scope.extend_from_slice(request.owner.as_deref().unwrap_or_default().as_bytes());
        scope.push(0);
        scope.extend_from_slice(password.unwrap_or_default().as_bytes());

        Ok(self.engine.blinded_hash(request.data.clone(), &scope).await?)
    }

    /// Best-effort secondary copy; returns the seeded locator.
    async fn seed(&self, payload: Bytes, metadata: &UploadMetadata, progress: &Progress) -> Option<String> {
        let seeder = self.seeder.as_ref()?;
        progress.set(UploadState::Seeding);

        let seeded = race_with_timeout(
            "seed",
            self.seed_timeout,
            seeder.upload(payload, metadata),
        )
        .await;
        match seeded {
            Ok(result) => Some(result.locator.unwrap_or(result.url)),
            Err(err) => {
                tracing::warn!(seeder = %seeder.kind(), error = %err, "seeding failed");
                None
            }
        }
    }

    async fn record_key(
        &self,
        id: &str,
        material: &KeyMaterial,
        request: &UploadRequest,
        mime_type: &str,
    ) -> Result<(), TesseraError> {
        self.keyring
            .store_key(id, material, &request.file_name, mime_type)
            .await?;
        if let Some(owner) = &request.owner {
            self.keyring.link_file_to_user(id, owner).await?;
        }
        Ok(())
    }

    async fn compensate(&self, id: &str) {
        if let Err(err) = self.primary.delete(id).await {
            tracing::warn!(id, error = %err, "failed to remove orphaned upload");
        }
    }

    async fn write_back(&self, id: &str, payload: Bytes) {
        let Some(cache) = &self.local_cache else {
            return;
        };
        if self.primary.kind() == BackendKind::Local {
            return;
        }
        if let Err(err) = cache.cache(id, payload).await {
            tracing::warn!(id, error = %err, "local cache write-back failed");
        }
    }

    pub async fn download(&self, request: &DownloadRequest) -> Result<Downloaded, TesseraError> {
        let started = Instant::now();
        let id = request.id.as_str();

        let entry = self.resolve_entry(id, request.owner.as_deref()).await?;
        let reference = self.index.find_by_reference(id).await?;
        // the recorded visibility outranks whatever the caller guesses
        let recorded = reference.as_ref().map(|r| r.visibility);
        let opening = match &entry {
            Some(entry) if entry.is_password_protected => {
                Opening::Password(require_password(request)?)
            }
            Some(entry) => match &entry.key {
                Some(key) => Opening::Key {
                    key: key.clone(),
                    nonce: entry.nonce,
                },
                None => return Err(TesseraError::DecryptionFailed),
            },
            None => match recorded.or(request.visibility) {
                Some(Visibility::Password) => Opening::Password(require_password(request)?),
                Some(Visibility::Private) => {
                    return Err(TesseraError::AccessDenied(format!(
                        "no key for private file {}",
                        id
                    )))
                }
                _ => Opening::Plain,
            },
        };

        let locator = request
            .locator
            .clone()
            .or_else(|| reference.as_ref().and_then(|r| r.locator.clone()));

        let target = FetchTarget::new(id).with_locator(locator);
        let fetched = match self.chain.fetch(&target).await {
            Ok(fetched) => fetched,
            Err(BackendError::NotFound(_)) if reference.is_some() => {
                return Err(TesseraError::BackendUnavailable(format!(
                    "{} is indexed but no backend could serve it",
                    id
                )))
            }
            Err(err) => return Err(err.into()),
        };
        if fetched.stage != BackendKind::Local.as_str() {
            self.write_back(id, fetched.data.clone()).await;
        }

        let visibility = opening.visibility();
        let data = self.open(fetched.data, opening).await?;

        tracing::info!(
            id,
            source = %fetched.stage,
            visibility = %visibility,
            size = data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "download complete"
        );

        Ok(Downloaded {
            data,
            file_name: entry.as_ref().map(|e| e.file_name.clone()),
            mime_type: entry.as_ref().map(|e| e.mime_type.clone()),
            visibility,
            source: fetched.stage,
        })
    }

    async fn open(&self, data: Bytes, opening: Opening) -> Result<Bytes, TesseraError> {
        match opening {
            Opening::Plain => Ok(data),
            Opening::Key { key, nonce } => Ok(self.engine.decrypt(data, &key, &nonce).await?),
            Opening::Password(password) => {
                let (salt, nonce) = {
                    let envelope = PasswordEnvelope::decode(&data)
                        .map_err(|_| TesseraError::DecryptionFailed)?;
                    (envelope.salt, envelope.nonce)
                };
                let ciphertext = data.slice(PasswordEnvelope::HEADER_SIZE..);
                Ok(self
                    .engine
                    .decrypt_with_password(ciphertext, &password, &salt, &nonce)
                    .await?)
            }
        }
    }

    /// The keyring entry for `id`, if any.
    ///
    /// An entry that exists but is withheld from `owner` is an access error,
    /// not a missing key.
    async fn resolve_entry(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> Result<Option<KeyringEntry>, TesseraError> {
        if !self.keyring.has_key(id).await? {
            return Ok(None);
        }
        match self.keyring.get_key(id, owner).await? {
            Some(entry) => Ok(Some(entry)),
            None => Err(TesseraError::AccessDenied(format!(
                "file {} belongs to another owner",
                id
            ))),
        }
    }

    /// Remove a file everywhere this device knows about it.
    pub async fn delete(&self, id: &str, owner: Option<&str>) -> Result<(), TesseraError> {
        self.resolve_entry(id, owner).await?;

        let reference = self.index.find_by_reference(id).await?;
        self.primary.delete(id).await?;

        if let (Some(seeder), Some(locator)) = (
            &self.seeder,
            reference.as_ref().and_then(|r| r.locator.as_deref()),
        ) {
            match locator.parse::<Locator>() {
                Ok(locator) => {
                    if let Err(err) = seeder.delete(&locator.hash.to_hex()).await {
                        tracing::warn!(id, error = %err, "failed to stop seeding");
                    }
                }
                Err(err) => tracing::warn!(id, error = %err, "unreadable swarm locator"),
            }
        }

        if let Some(cache) = &self.local_cache {
            if self.primary.kind() != BackendKind::Local {
                if let Err(err) = cache.delete(id).await {
                    tracing::warn!(id, error = %err, "failed to evict local cache copy");
                }
            }
        }

        let had_key = self.keyring.delete_key(id).await?;
        let references = self.index.remove_reference(id).await?;
        tracing::info!(id, had_key, references, "deleted");
        Ok(())
    }
}

fn require_password(request: &DownloadRequest) -> Result<String, TesseraError> {
    match request.password.as_deref() {
        Some(password) if !password.is_empty() => Ok(password.to_string()),
        _ => Err(TesseraError::AccessDenied(format!(
            "file {} is password protected",
            request.id
        ))),
    }
}
