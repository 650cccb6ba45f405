use std::path::PathBuf;

use clap::Args;
use tokio::sync::watch;

use common::error::TesseraError;
use common::orchestrator::{UploadRequest, UploadState};
use common::storage::UploadResult;
use common::visibility::Visibility;
use tessera::service::ServiceError;

#[derive(Args, Debug, Clone)]
pub struct Upload {
    /// File to store
    pub path: PathBuf,

    /// public, private or password
    #[arg(long, default_value = "private")]
    pub visibility: Visibility,

    /// Required for password visibility
    #[arg(long)]
    pub password: Option<String>,

    /// Owner the key is scoped to
    #[arg(long)]
    pub owner: Option<String>,

    /// Overrides the MIME type guessed from the file name
    #[arg(long)]
    pub mime_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("could not read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Tessera(#[from] TesseraError),
}

pub fn describe(result: &UploadResult) -> String {
    let mut lines = vec![
        format!("id:           {}", result.id),
        format!("backend:      {}", result.backend),
        format!("url:          {}", result.url),
        format!("size:         {}", result.size),
        format!("visibility:   {}", result.visibility),
        format!("deduplicated: {}", result.deduplicated),
    ];
    if let Some(locator) = &result.locator {
        lines.push(format!("locator:      {}", locator));
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Upload {
    type Error = UploadError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| UploadError::Read(self.path.clone(), e))?;
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let service = ctx.service().await?;

        let (tx, mut rx) = watch::channel(UploadState::Pending);
        let watcher = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                tracing::info!(%state, "upload progress");
                if state.is_terminal() {
                    break;
                }
            }
        });

        let mut request = UploadRequest::new(data, file_name, self.visibility).progress(tx);
        if let Some(password) = &self.password {
            request = request.password(password);
        }
        if let Some(owner) = &self.owner {
            request = request.owner(owner);
        }
        if let Some(mime_type) = &self.mime_type {
            request = request.mime_type(mime_type);
        }

        let result = service.orchestrator.upload(request).await;
        let _ = watcher.await;
        service.shutdown().await;

        Ok(describe(&result?))
    }
}
