//! Transmission into the exchange channel
//!
//! Handles receiver filtering, attachment staging and encryption, and the
//! cleanup of staged files after every send attempt.

use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use warden_core::{Envelope, GroupId};

use crate::codec::format_wire;
use crate::crypto::{AttachmentCipher, CryptoError};
use crate::platform::{call, FloodPolicy, Reply, SharedPlatform};

/// Errors from sending or fetching exchange data
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Send of {0} not confirmed")]
    NotSent(String),

    #[error("Download of {0} failed")]
    Download(String),
}

/// Bulk payload sent next to an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// Serialized to JSON bytes before staging
    Json(Value),
    /// Sent as is, e.g. an image
    Bytes(Vec<u8>),
}

impl Attachment {
    fn into_bytes(self) -> Result<Vec<u8>, ExchangeError> {
        match self {
            Attachment::Json(value) => {
                serde_json::to_vec(&value).map_err(|e| ExchangeError::Encode(e.to_string()))
            }
            Attachment::Bytes(bytes) => Ok(bytes),
        }
    }
}

/// Exchange endpoint configuration
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Local agent name
    pub sender: String,
    /// Shared exchange channel
    pub channel_id: GroupId,
    /// Staging directory for attachments
    pub tmp_dir: PathBuf,
    pub flood: FloodPolicy,
}

/// The local agent's view of the exchange channel
pub struct Exchange {
    platform: SharedPlatform,
    cipher: AttachmentCipher,
    config: ExchangeConfig,
}

impl Exchange {
    pub fn new(platform: SharedPlatform, cipher: AttachmentCipher, config: ExchangeConfig) -> Self {
        Self {
            platform,
            cipher,
            config,
        }
    }

    pub fn sender(&self) -> &str {
        &self.config.sender
    }

    pub fn platform(&self) -> &SharedPlatform {
        &self.platform
    }

    pub fn flood(&self) -> &FloodPolicy {
        &self.config.flood
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.config.tmp_dir
    }

    /// Fresh staging path under the tmp dir
    pub fn new_tmp_path(&self) -> PathBuf {
        self.config.tmp_dir.join(Uuid::new_v4().to_string())
    }

    /// Build an envelope from the local agent and transmit it without attachment
    pub async fn share(
        &self,
        to: &[String],
        action: &str,
        action_type: &str,
        data: Value,
    ) -> Result<(), ExchangeError> {
        let envelope = self.envelope(to, action, action_type, data);
        self.transmit(envelope, None, true).await
    }

    /// Build an envelope from the local agent and transmit it with an attachment
    pub async fn share_file(
        &self,
        to: &[String],
        action: &str,
        action_type: &str,
        data: Value,
        attachment: Attachment,
        encrypt: bool,
    ) -> Result<(), ExchangeError> {
        let envelope = self.envelope(to, action, action_type, data);
        self.transmit(envelope, Some(attachment), encrypt).await
    }

    fn envelope(&self, to: &[String], action: &str, action_type: &str, data: Value) -> Envelope {
        Envelope {
            from: self.config.sender.clone(),
            to: to.to_vec(),
            action: action.to_string(),
            action_type: action_type.to_string(),
            data,
        }
    }

    /// Post an envelope into the exchange channel
    ///
    /// The sender is removed from the receivers first; if nobody is left the
    /// call succeeds without touching the platform.
    pub async fn transmit(
        &self,
        mut envelope: Envelope,
        attachment: Option<Attachment>,
        encrypt: bool,
    ) -> Result<(), ExchangeError> {
        envelope.strip_sender();
        if !envelope.has_receivers() {
            debug!("No receivers for {}/{}", envelope.action, envelope.action_type);
            return Ok(());
        }

        let label = format!("{}/{}", envelope.action, envelope.action_type);
        let text = format_wire(&envelope).ok_or_else(|| ExchangeError::Encode(label.clone()))?;
        let channel_id = self.config.channel_id;

        let Some(attachment) = attachment else {
            return match call(&self.config.flood, "Send exchange text", || {
                self.platform.send_message(channel_id, &text)
            })
            .await
            {
                Reply::Value(_) => Ok(()),
                _ => Err(ExchangeError::NotSent(label)),
            };
        };

        let mut bytes = attachment.into_bytes()?;
        if encrypt {
            bytes = self.cipher.encrypt(&bytes)?;
        }

        tokio::fs::create_dir_all(&self.config.tmp_dir).await?;
        let path = self.new_tmp_path();
        tokio::fs::write(&path, &bytes).await?;

        let reply = call(&self.config.flood, "Send exchange document", || {
            self.platform.send_document(channel_id, &path, &text)
        })
        .await;
        self.schedule_delete(path);

        match reply {
            Reply::Value(_) => Ok(()),
            _ => Err(ExchangeError::NotSent(label)),
        }
    }

    /// Download an attached document and optionally decrypt it
    ///
    /// The downloaded file is removed afterwards.
    pub async fn fetch_attachment(&self, file_id: &str, decrypt: bool) -> Result<Vec<u8>, ExchangeError> {
        tokio::fs::create_dir_all(&self.config.tmp_dir).await?;
        let dest = self.new_tmp_path();

        let path = call(&self.config.flood, "Download attachment", || {
            self.platform.download_media(file_id, &dest)
        })
        .await
        .value()
        .ok_or_else(|| ExchangeError::Download(file_id.to_string()))?;

        let bytes = tokio::fs::read(&path).await;
        self.schedule_delete(path);
        let bytes = bytes?;

        if decrypt {
            Ok(self.cipher.decrypt(&bytes)?)
        } else {
            Ok(bytes)
        }
    }

    /// Delete a staged file in the background, only inside the tmp dir
    pub fn schedule_delete(&self, path: PathBuf) {
        if !path.starts_with(&self.config.tmp_dir) {
            return;
        }

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Delete staged file {} error: {}", path.display(), e);
            }
        });
    }
}
