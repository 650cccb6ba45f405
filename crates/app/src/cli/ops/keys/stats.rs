use clap::Args;

use super::KeysError;

#[derive(Args, Debug, Clone)]
pub struct Stats;

#[async_trait::async_trait]
impl crate::cli::op::Op for Stats {
    type Error = KeysError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service().await?;
        let stats = service.keyring.get_stats().await?;

        Ok(format!(
            "total:              {}\nprivate:            {}\npassword protected: {}",
            stats.total, stats.private, stats.password_protected
        ))
    }
}
