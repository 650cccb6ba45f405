use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

/// Where an upload is in its lifecycle.
///
/// `Pending → Validating → Deduping → Encrypting? → Uploading → Seeding? → Completed`,
/// or `Failed` from any step. A dedup hit goes straight from `Deduping` to
/// `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Pending,
    Validating,
    Deduping,
    Encrypting,
    Uploading,
    Seeding,
    Completed,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Pending => "pending",
            UploadState::Validating => "validating",
            UploadState::Deduping => "deduping",
            UploadState::Encrypting => "encrypting",
            UploadState::Uploading => "uploading",
            UploadState::Seeding => "seeding",
            UploadState::Completed => "completed",
            UploadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Optional sink for state transitions.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    tx: Option<watch::Sender<UploadState>>,
}

impl Progress {
    pub fn new(tx: Option<watch::Sender<UploadState>>) -> Self {
        Self { tx }
    }

    pub fn set(&self, state: UploadState) {
        tracing::debug!(state = %state, "upload state");
        if let Some(tx) = &self.tx {
            tx.send_replace(state);
        }
    }
}
