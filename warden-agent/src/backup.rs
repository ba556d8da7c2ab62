//! Backup broadcasts and rollback

use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use warden_exchange::{Attachment, Exchange};

use crate::error::AgentError;
use crate::state::AppState;
use crate::store::Dataset;

impl AppState {
    /// Every persisted dataset, fixed ones first
    pub fn datasets(&self) -> Vec<Dataset> {
        Dataset::all(&self.rules().categories())
    }

    /// Send each dataset to the backup receivers, pausing between datasets
    ///
    /// A failure is logged and the next dataset is still sent.
    pub async fn backup_files(&self, exchange: &Exchange) -> usize {
        let pause = Duration::from_secs(self.settings().time.backup_pause_secs);
        let datasets = self.datasets();

        let mut sent = 0;
        for (i, dataset) in datasets.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            match self.backup_dataset(exchange, *dataset).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("Send backup file {} error: {}", dataset, e),
            }
        }

        info!("Backed up {} of {} datasets", sent, datasets.len());
        sent
    }

    async fn backup_dataset(&self, exchange: &Exchange, dataset: Dataset) -> Result<(), AgentError> {
        let value = self.dataset_value(dataset).await?;
        exchange
            .share_file(
                &self.settings().receivers.backup,
                "backup",
                "data",
                json!(dataset.name()),
                Attachment::Json(value),
                true,
            )
            .await?;
        Ok(())
    }

    /// Running status for the backup agent
    pub async fn send_status(&self, exchange: &Exchange, status: &str) -> Result<(), AgentError> {
        exchange
            .share(
                &self.settings().receivers.backup,
                "backup",
                "status",
                json!({
                    "type": status,
                    "backup": self.settings().custom.backup,
                }),
            )
            .await?;
        Ok(())
    }

    /// Replace a dataset with the copy in an encrypted attachment
    pub async fn rollback(&self, exchange: &Exchange, name: &str, file_id: &str) -> Result<(), AgentError> {
        let dataset: Dataset = name.parse()?;
        let bytes = exchange.fetch_attachment(file_id, true).await?;
        self.restore(dataset, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;
    use crate::state::tests::fresh_state;
    use crate::store::MemoryStore;
    use crate::whitelist::tests::test_exchange;
    use std::sync::Arc;
    use warden_exchange::mock::RecordingPlatform;
    use warden_exchange::{codec, AttachmentCipher};

    #[tokio::test]
    async fn test_backup_every_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = sample();
        settings.time.backup_pause_secs = 0;
        let state = AppState::load(settings, Arc::new(MemoryStore::default())).unwrap();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());

        let sent = state.backup_files(&exchange).await;
        assert_eq!(sent, 9 + 6);

        let documents = platform.documents();
        assert_eq!(documents.len(), sent);
        let first = codec::receive(Some(&documents[0].caption)).unwrap();
        assert_eq!(first.to, vec!["BACKUP".to_string()]);
        assert_eq!(first.data, json!("admin_ids"));
    }

    #[tokio::test]
    async fn test_status() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());

        state.send_status(&exchange, "awake").await.unwrap();
        let (_, text) = platform.sent_messages().remove(0);
        let envelope = codec::receive(Some(&text)).unwrap();
        assert_eq!(envelope.data["type"], "awake");
        assert_eq!(envelope.data["backup"], false);
    }

    #[tokio::test]
    async fn test_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());

        let cipher = AttachmentCipher::from_password("hunter2");
        platform.add_file("doc", cipher.encrypt(br#"[-100, -200]"#).unwrap());

        state.rollback(&exchange, "left_group_ids", "doc").await.unwrap();
        assert!(state.is_left(-200));
        assert!(state.rollback(&exchange, "nothing", "doc").await.is_err());
    }
}
