use clap::Args;

use common::keyring::KeyringEntry;

use super::KeysError;

/// List keys, optionally only those linked to one owner
#[derive(Args, Debug, Clone)]
pub struct Ls {
    #[arg(long)]
    pub owner: Option<String>,
}

fn line(entry: &KeyringEntry) -> String {
    let kind = if entry.is_password_protected {
        "password"
    } else {
        "private"
    };
    format!(
        "{}\t{}\t{}\t{}\t{}",
        entry.file_id,
        kind,
        entry.owner_id.as_deref().unwrap_or("-"),
        entry.mime_type,
        entry.file_name
    )
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ls {
    type Error = KeysError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service().await?;
        let entries = match &self.owner {
            Some(owner) => service.keyring.get_keys_by_owner(owner).await?,
            None => service.keyring.list_keys().await?,
        };

        if entries.is_empty() {
            return Ok("no keys".to_string());
        }
        Ok(entries.iter().map(line).collect::<Vec<_>>().join("\n"))
    }
}
