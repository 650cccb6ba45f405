//! Shared test utilities for orchestrator integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

use ::common::content_index::ContentIndex;
use ::common::crypto::{hash, CryptoEngine};
use ::common::database::Database;
use ::common::keyring::Keyring;
use ::common::orchestrator::{Orchestrator, OrchestratorBuilder};
use ::common::storage::{
    BackendError, BackendKind, FetchStage, FetchTarget, Locator, StorageAdapter, UploadMetadata,
    UploadResult,
};

/// In-memory backend that counts uploads and can be told to fail.
#[derive(Debug)]
pub struct MemoryAdapter {
    kind: BackendKind,
    objects: Mutex<HashMap<String, Bytes>>,
    uploads: AtomicUsize,
    fail_uploads: bool,
}

impl MemoryAdapter {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            objects: Mutex::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
            fail_uploads: false,
        }
    }

    pub fn failing(kind: BackendKind) -> Self {
        Self {
            fail_uploads: true,
            ..Self::new(kind)
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn object(&self, id: &str) -> Option<Bytes> {
        self.objects.lock().get(id).cloned()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn upload(
        &self,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> Result<UploadResult, BackendError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads {
            return Err(BackendError::Unavailable("memory backend is down".into()));
        }

        let id = format!("mem-{}", hash(&data).to_hex());
        let size = data.len() as u64;
        self.objects.lock().insert(id.clone(), data);

        Ok(UploadResult {
            backend: self.kind,
            url: format!("mem://{}", id),
            id,
            locator: None,
            size,
            visibility: metadata.visibility,
            deduplicated: false,
        })
    }

    async fn download(&self, id: &str) -> Result<Bytes, BackendError> {
        self.object(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.objects.lock().remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        Ok(self.objects.lock().contains_key(id))
    }
}

/// Stand-in for the swarm: returns real locators, optionally after a delay.
#[derive(Debug, Default)]
pub struct FakeSeeder {
    delay: Duration,
    seeded: Mutex<Vec<String>>,
    unseeded: Mutex<Vec<String>>,
}

impl FakeSeeder {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn seeded(&self) -> Vec<String> {
        self.seeded.lock().clone()
    }

    pub fn unseeded(&self) -> Vec<String> {
        self.unseeded.lock().clone()
    }
}

#[async_trait]
impl StorageAdapter for FakeSeeder {
    fn kind(&self) -> BackendKind {
        BackendKind::Swarm
    }

    async fn upload(
        &self,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> Result<UploadResult, BackendError> {
        tokio::time::sleep(self.delay).await;

        let locator = Locator::new(iroh_blobs::Hash::new(&data));
        let id = locator.hash.to_hex().to_string();
        self.seeded.lock().push(id.clone());

        Ok(UploadResult {
            backend: BackendKind::Swarm,
            id,
            url: locator.to_string(),
            locator: Some(locator.to_string()),
            size: data.len() as u64,
            visibility: metadata.visibility,
            deduplicated: false,
        })
    }

    async fn download(&self, id: &str) -> Result<Bytes, BackendError> {
        Err(BackendError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.unseeded.lock().push(id.to_string());
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        Ok(self.seeded.lock().iter().any(|s| s == id))
    }
}

/// A download stage that never answers in time.
#[derive(Debug)]
pub struct StalledStage {
    pub name: &'static str,
    pub timeout: Duration,
    pub calls: AtomicUsize,
}

impl StalledStage {
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FetchStage for StalledStage {
    fn name(&self) -> &str {
        self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, _target: &FetchTarget) -> Result<Bytes, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(BackendError::Unavailable("stalled".into()))
    }
}

pub struct TestEnv {
    pub db: Database,
    pub primary: Arc<MemoryAdapter>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_primary(MemoryAdapter::new(BackendKind::Node)).await
    }

    pub async fn with_primary(primary: MemoryAdapter) -> Self {
        Self {
            db: Database::in_memory().await.unwrap(),
            primary: Arc::new(primary),
        }
    }

    pub fn keyring(&self) -> Keyring {
        Keyring::new(self.db.clone())
    }

    pub fn index(&self) -> ContentIndex {
        ContentIndex::new(self.db.clone())
    }

    pub fn builder(&self) -> OrchestratorBuilder {
        Orchestrator::builder(
            CryptoEngine::spawn().unwrap(),
            self.keyring(),
            self.index(),
            self.primary.clone(),
        )
        .fingerprint_secret(b"integration test installation".to_vec())
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.builder().build()
    }
}

/// Serve `router` on an ephemeral local port.
pub async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{}", addr)).unwrap()
}

/// Deterministic, non-repeating test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
