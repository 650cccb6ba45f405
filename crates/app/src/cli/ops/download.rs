use std::path::PathBuf;

use clap::Args;

use common::error::TesseraError;
use common::orchestrator::DownloadRequest;
use common::visibility::Visibility;
use tessera::service::ServiceError;

#[derive(Args, Debug, Clone)]
pub struct Download {
    /// Backend id returned by upload
    pub id: String,

    /// Where to write the plaintext (defaults to the stored file name)
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// Swarm locator to try before the other backends
    #[arg(long)]
    pub locator: Option<String>,

    /// How the file was stored, when this device has no key for it
    #[arg(long)]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("could not write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Tessera(#[from] TesseraError),
}

impl Download {
    fn request(&self) -> DownloadRequest {
        DownloadRequest {
            id: self.id.clone(),
            owner: self.owner.clone(),
            password: self.password.clone(),
            locator: self.locator.clone(),
            visibility: self.visibility,
        }
    }

    fn out_path(&self, file_name: Option<&str>) -> PathBuf {
        if let Some(out) = &self.out {
            return out.clone();
        }
        // stored names may carry directories from another device
        let name = file_name
            .and_then(|name| std::path::Path::new(name).file_name())
            .map(PathBuf::from);
        name.unwrap_or_else(|| PathBuf::from(&self.id))
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Download {
    type Error = DownloadError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service().await?;
        let result = service.orchestrator.download(&self.request()).await;
        service.shutdown().await;
        let downloaded = result?;

        let out = self.out_path(downloaded.file_name.as_deref());
        tokio::fs::write(&out, &downloaded.data)
            .await
            .map_err(|e| DownloadError::Write(out.clone(), e))?;

        Ok(format!(
            "wrote {} bytes to {} ({}, from {})",
            downloaded.data.len(),
            out.display(),
            downloaded.visibility,
            downloaded.source
        ))
    }
}
