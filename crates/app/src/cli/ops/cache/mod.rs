use clap::{Args, Subcommand};

use object_store::BlobStoreError;
use tessera::service::ServiceError;

use crate::cli::op::Op;

crate::command_enum! {
    (Stats, CacheStats),
    (Recover, Recover),
}

pub type CacheCommand = Command;

/// Inspect and repair the local cache
#[derive(Args, Debug, Clone)]
pub struct Cache {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[async_trait::async_trait]
impl Op for Cache {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Store(#[from] BlobStoreError),
}

/// Object count and bytes held locally
#[derive(Args, Debug, Clone)]
pub struct CacheStats;

#[async_trait::async_trait]
impl Op for CacheStats {
    type Error = CacheError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service().await?;
        let store = service.cache.store();

        Ok(format!(
            "objects: {}\nbytes:   {}",
            store.count().await?,
            store.total_size().await?
        ))
    }
}

/// Rebuild missing metadata rows from what object storage holds
#[derive(Args, Debug, Clone)]
pub struct Recover;

#[async_trait::async_trait]
impl Op for Recover {
    type Error = CacheError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service().await?;
        let stats = service.cache.store().recover().await?;

        tracing::info!(scanned = stats.scanned, recovered = stats.recovered, "cache recovered");
        Ok(format!(
            "scanned {} objects, recovered {}",
            stats.scanned, stats.recovered
        ))
    }
}
