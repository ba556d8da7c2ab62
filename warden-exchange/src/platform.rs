//! Chat-platform adapter contract
//!
//! The platform client itself lives outside this workspace. Everything the
//! agent needs from it is expressed by [`Platform`]; every call goes through
//! [`call`], which retries on flood waits and folds the outcome into a
//! tri-state [`Reply`].

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use warden_core::{GroupId, MessageId, UserId};

/// Errors surfaced by a platform client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Flood wait of {0} seconds")]
    FloodWait(u64),

    #[error("Chat inaccessible")]
    Inaccessible,

    #[error("Platform error: {0}")]
    Other(String),
}

/// Outcome of an adapter call after retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Value(T),
    /// The chat or user is definitely gone
    Gone,
    /// Transient or unknown failure
    Unknown,
}

impl<T> Reply<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Reply::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Reply::Gone)
    }
}

/// A user profile as reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: UserId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_self: bool,
    /// Handle of the current profile photo
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl PlatformUser {
    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

/// Membership status inside a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

/// One member of a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMember {
    pub user: PlatformUser,
    pub status: MemberStatus,
    #[serde(default)]
    pub can_delete_messages: bool,
    #[serde(default)]
    pub can_restrict_members: bool,
}

impl ChatMember {
    /// Still in the chat without being restricted, left or kicked
    pub fn is_ordinary(&self) -> bool {
        matches!(
            self.status,
            MemberStatus::Creator | MemberStatus::Administrator | MemberStatus::Member
        )
    }

    /// Creator, or an administrator able to delete and restrict
    pub fn can_moderate(&self) -> bool {
        self.status == MemberStatus::Creator
            || (self.status == MemberStatus::Administrator
                && self.can_delete_messages
                && self.can_restrict_members)
    }
}

/// Everything the agent consumes from the chat platform
#[async_trait]
pub trait Platform: Send + Sync {
    async fn send_message(&self, chat_id: GroupId, text: &str) -> Result<MessageId, PlatformError>;

    async fn send_document(
        &self,
        chat_id: GroupId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageId, PlatformError>;

    /// Download a referenced file into `dest`
    async fn download_media(&self, file_id: &str, dest: &Path) -> Result<PathBuf, PlatformError>;

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<PlatformUser>, PlatformError>;

    async fn get_admins(&self, chat_id: GroupId) -> Result<Vec<ChatMember>, PlatformError>;

    async fn get_chat_member(
        &self,
        chat_id: GroupId,
        user_id: UserId,
    ) -> Result<ChatMember, PlatformError>;

    async fn get_members(&self, chat_id: GroupId) -> Result<Vec<ChatMember>, PlatformError>;

    async fn leave_chat(&self, chat_id: GroupId) -> Result<(), PlatformError>;

    async fn read_history(&self, chat_id: GroupId) -> Result<(), PlatformError>;

    async fn read_mention(&self, chat_id: GroupId) -> Result<(), PlatformError>;

    async fn update_status(&self, online: bool) -> Result<(), PlatformError>;
}

/// Shared platform handle
pub type SharedPlatform = Arc<dyn Platform>;

/// Flood-wait retry policy
#[derive(Debug, Clone)]
pub struct FloodPolicy {
    /// Retries after a flood wait before giving up
    pub max_retries: u32,
    /// Upper bound on a single requested wait, in seconds
    pub max_wait_secs: u64,
}

impl Default for FloodPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_wait_secs: 300,
        }
    }
}

impl FloodPolicy {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Requested wait plus 0.5-1.0 s of jitter
    fn backoff(&self, secs: u64) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.0);
        Duration::from_secs(secs.min(self.max_wait_secs)) + Duration::from_secs_f64(jitter)
    }
}

/// Run one adapter call under the flood-wait contract
///
/// Flood waits sleep and retry the same call (never the enclosing handler).
/// An inaccessible chat becomes [`Reply::Gone`]; anything else is logged and
/// becomes [`Reply::Unknown`].
pub async fn call<T, F, Fut>(policy: &FloodPolicy, what: &str, mut f: F) -> Reply<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Reply::Value(value),
            Err(PlatformError::FloodWait(secs)) if attempt < policy.max_retries => {
                attempt += 1;
                debug!("{} flood wait {}s (attempt {})", what, secs, attempt);
                tokio::time::sleep(policy.backoff(secs)).await;
            }
            Err(PlatformError::FloodWait(secs)) => {
                warn!("{} gave up after {} flood waits (last {}s)", what, attempt, secs);
                return Reply::Unknown;
            }
            Err(PlatformError::Inaccessible) => {
                debug!("{} target inaccessible", what);
                return Reply::Gone;
            }
            Err(e) => {
                warn!("{} failed: {}", what, e);
                return Reply::Unknown;
            }
        }
    }
}
