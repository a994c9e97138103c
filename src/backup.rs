use crate::error::ConsoleError;
use crate::log_fetcher::{FetchOutcome, LogFetcher, LogQuery};
use crate::session::{ensure_success, Session};
use crate::types::{ApiMessage, BackupStatus, DriveAuthUrl};
use log::info;

/// Folder the server archives logs into.
pub const BACKUP_FOLDER: &str = "MakeTicket-Logs";

/// Reflects the server's backup integration state and triggers its transitions.
///
/// Nothing here is optimistic: every mutation is followed by a status refetch
/// and only the server's answer is returned.
pub struct BackupPanel {
    session: Session,
    fetcher: LogFetcher,
}

impl BackupPanel {
    pub fn new(session: Session) -> Self {
        Self {
            fetcher: LogFetcher::new(session.clone()),
            session,
        }
    }

    /// The status piggybacks on the log listing endpoint.
    pub async fn status(&self) -> Result<BackupStatus, ConsoleError> {
        // Superseded or not, the answer is what the server reported.
        let body = match self.fetcher.fetch(&LogQuery::default().with_lines(1)).await? {
            FetchOutcome::Fresh(body) | FetchOutcome::Stale(body) => body,
        };
        Ok(body.backup_status.unwrap_or_default())
    }

    /// URL the operator must open to authorize the storage provider.
    pub async fn connect(&self) -> Result<String, ConsoleError> {
        let response = self
            .session
            .get("/admin/logs/drive/auth-url")
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: DriveAuthUrl = response.json().await?;

        info!("Received backup authorization URL");
        Ok(body.url)
    }

    pub async fn disconnect(&self) -> Result<BackupStatus, ConsoleError> {
        let response = self.session.delete("/admin/logs/drive").send().await?;
        ensure_success(response).await?;

        info!("Backup integration disconnected");
        self.status().await
    }

    pub async fn backup_now(&self) -> Result<BackupStatus, ConsoleError> {
        let response = self.session.post("/admin/logs/backup").send().await?;
        let status = response.status();
        let body: ApiMessage = response.json().await.unwrap_or_default();

        if !status.is_success() {
            let message = if body.message.is_empty() {
                format!("server returned {}", status)
            } else {
                body.message
            };
            return Err(ConsoleError::BackupError(message));
        }

        info!(
            "Backup completed{}",
            body.file_id
                .map(|id| format!(" (file {})", id))
                .unwrap_or_default()
        );
        self.status().await
    }
}
