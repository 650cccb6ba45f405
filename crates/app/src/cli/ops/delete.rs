use clap::Args;

use common::error::TesseraError;
use tessera::service::ServiceError;

#[derive(Args, Debug, Clone)]
pub struct Delete {
    pub id: String,

    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Tessera(#[from] TesseraError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Delete {
    type Error = DeleteError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service().await?;
        let result = service
            .orchestrator
            .delete(&self.id, self.owner.as_deref())
            .await;
        service.shutdown().await;
        result?;

        Ok(format!("deleted {}", self.id))
    }
}
