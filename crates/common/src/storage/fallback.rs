use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use super::swarm::{Locator, SwarmAdapter};
use super::{check_status, BackendError, StorageAdapter};

/// What a download is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub id: String,
    /// Swarm locator, when the caller has one
    pub locator: Option<String>,
}

impl FetchTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: None,
        }
    }

    pub fn with_locator(mut self, locator: Option<String>) -> Self {
        self.locator = locator;
        self
    }
}

/// One step of a download chain.
#[async_trait]
pub trait FetchStage: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Upper bound on a single fetch through this stage
    fn timeout(&self) -> Duration;

    /// Whether the stage can serve this target at all
    fn applies(&self, _target: &FetchTarget) -> bool {
        true
    }

    async fn fetch(&self, target: &FetchTarget) -> Result<Bytes, BackendError>;
}

/// Race `fut` against a timer.
///
/// Whichever branch loses is dropped on return, which cancels the request
/// and releases its timer and sockets.
pub async fn race_with_timeout<T, F>(what: &str, timeout: Duration, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::select! {
        result = fut => result,
        _ = tokio::time::sleep(timeout) => Err(BackendError::timeout(what, timeout)),
    }
}

/// Bytes returned by a chain together with the stage that produced them.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub data: Bytes,
    pub stage: String,
}

/// Ordered download stages; the first success wins.
#[derive(Debug, Clone, Default)]
pub struct FallbackChain {
    stages: Vec<Arc<dyn FetchStage>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl FetchStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn push(&mut self, stage: Arc<dyn FetchStage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Try every stage in order.
    ///
    /// If nothing succeeds the result is a single terminal error:
    /// [`BackendError::NotFound`] when every stage that ran reported the
    /// object absent, [`BackendError::Unavailable`] otherwise.
    pub async fn fetch(&self, target: &FetchTarget) -> Result<Fetched, BackendError> {
        let mut failures: Vec<(String, BackendError)> = Vec::new();

        for stage in &self.stages {
            if !stage.applies(target) {
                tracing::debug!(stage = stage.name(), id = %target.id, "stage skipped");
                continue;
            }

            let started = Instant::now();
            let result = race_with_timeout(stage.name(), stage.timeout(), stage.fetch(target)).await;
            match result {
                Ok(data) => {
                    tracing::debug!(
                        stage = stage.name(),
                        id = %target.id,
                        size = data.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "fetched"
                    );
                    return Ok(Fetched {
                        data,
                        stage: stage.name().to_string(),
                    });
                }
                Err(err) => {
                    tracing::debug!(
                        stage = stage.name(),
                        id = %target.id,
                        error = %err,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "stage failed"
                    );
                    failures.push((stage.name().to_string(), err));
                }
            }
        }

        if failures.iter().all(|(_, err)| err.is_not_found()) {
            return Err(BackendError::NotFound(target.id.clone()));
        }

        let summary = failures
            .iter()
            .map(|(stage, err)| format!("{}: {}", stage, err))
            .collect::<Vec<_>>()
            .join("; ");
        Err(BackendError::Unavailable(summary))
    }
}

/// Fetch through a [`StorageAdapter`]'s own download.
#[derive(Debug, Clone)]
pub struct AdapterStage {
    name: String,
    adapter: Arc<dyn StorageAdapter>,
    timeout: Duration,
}

impl AdapterStage {
    pub fn new(adapter: Arc<dyn StorageAdapter>, timeout: Duration) -> Self {
        Self {
            name: adapter.kind().to_string(),
            adapter,
            timeout,
        }
    }
}

#[async_trait]
impl FetchStage for AdapterStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, target: &FetchTarget) -> Result<Bytes, BackendError> {
        self.adapter.download(&target.id).await
    }
}

/// Fetch from the origin HTTP endpoint at `{origin}/files/{id}`.
#[derive(Debug, Clone)]
pub struct OriginStage {
    client: reqwest::Client,
    origin: Url,
    timeout: Duration,
}

impl OriginStage {
    pub fn new(client: reqwest::Client, origin: Url, timeout: Duration) -> Self {
        Self {
            client,
            origin,
            timeout,
        }
    }
}

#[async_trait]
impl FetchStage for OriginStage {
    fn name(&self) -> &str {
        "origin"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, target: &FetchTarget) -> Result<Bytes, BackendError> {
        let url = format!(
            "{}/files/{}",
            self.origin.as_str().trim_end_matches('/'),
            target.id
        );
        let response = self.client.get(url).send().await?;
        let response = check_status("origin", response).await?;
        Ok(response.bytes().await?)
    }
}

/// Fetch over the peer swarm; only applies when the target has a locator.
#[derive(Debug, Clone)]
pub struct SwarmStage {
    swarm: Arc<SwarmAdapter>,
    timeout: Duration,
}

impl SwarmStage {
    pub fn new(swarm: Arc<SwarmAdapter>, timeout: Duration) -> Self {
        Self { swarm, timeout }
    }
}

#[async_trait]
impl FetchStage for SwarmStage {
    fn name(&self) -> &str {
        "swarm"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn applies(&self, target: &FetchTarget) -> bool {
        target.locator.is_some()
    }

    async fn fetch(&self, target: &FetchTarget) -> Result<Bytes, BackendError> {
        let locator = target
            .locator
            .as_deref()
            .ok_or_else(|| BackendError::NotFound(target.id.clone()))?;
        let locator: Locator = locator.parse()?;
        self.swarm.download_from(&locator).await
    }
}
