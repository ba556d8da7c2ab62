//! Node
//!
//! Wires platform events and scheduled jobs into the agent:
//! - exchange channel messages are decoded, routed and handled one at a time
//! - joins feed the trust records and avatar detection
//! - group messages feed volume accounting
//! - mentions and reads are acknowledged in the background

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warden_agent::{AgentError, AppState, FileStore, Settings};
use warden_core::{now, Envelope, GroupId, MessageId, Timestamp, SERVICE_USER_ID};
use warden_exchange::{
    call, receive, AttachmentCipher, Exchange, ExchangeConfig, InboundMessage, PlatformUser,
    SharedPlatform,
};

use crate::jobs::JobKind;
use crate::router::{route_envelope, Handler};

/// Upper bound of the random delay before a presence update
const DEFAULT_STATUS_JITTER: Duration = Duration::from_secs(60);

/// New members announced in a group
#[derive(Debug, Clone)]
pub struct JoinEvent {
    pub chat_id: GroupId,
    pub message_id: MessageId,
    pub members: Vec<PlatformUser>,
}

/// An ordinary message posted in a group
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub chat_id: GroupId,
    pub message_id: MessageId,
    pub from: PlatformUser,
}

pub struct Node {
    state: Arc<AppState>,
    exchange: Arc<Exchange>,
    status_jitter: Duration,
}

impl Node {
    pub fn new(state: Arc<AppState>, exchange: Arc<Exchange>) -> Self {
        Self {
            state,
            exchange,
            status_jitter: DEFAULT_STATUS_JITTER,
        }
    }

    /// Open the file store under `paths.data_dir` and load every dataset
    pub fn open(settings: Settings, platform: SharedPlatform) -> anyhow::Result<Self> {
        let store = FileStore::open(&settings.paths.data_dir)?;

        let exchange = Exchange::new(
            platform,
            AttachmentCipher::from_password(&settings.encrypt.password),
            ExchangeConfig {
                sender: settings.sender().to_string(),
                channel_id: settings.channels.exchange_channel_id,
                tmp_dir: settings.paths.tmp_dir.clone(),
                flood: settings.flood_policy(),
            },
        );

        let state = AppState::load(settings, Arc::new(store))?;
        info!("Node {} ready", state.settings().sender());
        Ok(Self::new(Arc::new(state), Arc::new(exchange)))
    }

    pub fn with_status_jitter(mut self, jitter: Duration) -> Self {
        self.status_jitter = jitter;
        self
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// Handle a message from the exchange channel
    ///
    /// Returns the handler that ran, if the envelope was accepted.
    pub async fn on_exchange_message(&self, message: InboundMessage) -> Option<Handler> {
        if message.chat_id != self.state.settings().channels.exchange_channel_id {
            return None;
        }

        let Some(envelope) = receive(message.text.as_deref()) else {
            debug!("Ignoring exchange message {}", message.message_id);
            return None;
        };

        let handler = route_envelope(&envelope, self.state.settings().sender())?;

        let _guard = self.state.receive_lock().lock().await;
        debug!("Receive {} from {}", handler, envelope.from);
        if let Err(e) = self.dispatch(handler, &envelope, message.document.as_deref()).await {
            warn!("Receive {} from {} error: {}", handler, envelope.from, e);
        }

        Some(handler)
    }

    async fn dispatch(&self, handler: Handler, envelope: &Envelope, document: Option<&str>) -> Result<(), AgentError> {
        let state = &self.state;
        let exchange = &self.exchange;
        let data = &envelope.data;

        match handler {
            Handler::AddBad { allow_channels } => state.receive_add_bad(data, allow_channels),
            Handler::AddExcept => state.receive_except(exchange, data, true).await,
            Handler::AddScore => state.receive_add_score(&envelope.from, data),
            Handler::AddWatch => state.receive_add_watch(data),
            Handler::AddWhite => state.receive_add_white(data).await,
            Handler::Clear(dataset) => state.receive_clear(dataset, data).await,
            Handler::Declare => state.receive_declared(data),
            Handler::Deleted => state.receive_deleted(data),
            Handler::KickUser => state.receive_kick_user(data).await,
            Handler::LeaveApprove => state.receive_leave_approve(exchange, data).await,
            Handler::Refresh => {
                state.refresh_admins(exchange).await;
                Ok(())
            }
            Handler::RegexCount => {
                if data.as_str() == Some("ask") {
                    state.flush_counters(exchange).await;
                }
                Ok(())
            }
            Handler::RegexUpdate => state.receive_regex(exchange, data, document).await,
            Handler::RemoveBad => state.receive_remove_bad(data),
            Handler::RemoveExcept => state.receive_except(exchange, data, false).await,
            Handler::RemoveScore => state.receive_remove_score(data),
            Handler::RemoveWatch => state.receive_remove_watch(data),
            Handler::RemoveWhite => state.receive_remove_white(data).await,
            Handler::Rollback => state.receive_rollback(exchange, data, document).await,
            Handler::VersionAsk => state.receive_version_ask(exchange, data).await,
        }
    }

    async fn bio_of(&self, user: &PlatformUser) -> Option<String> {
        if user.bio.is_some() {
            return user.bio.clone();
        }

        let platform = self.exchange.platform();
        let ids = [user.id];
        call(self.exchange.flood(), "Get user", || platform.get_users(&ids))
            .await
            .value()?
            .into_iter()
            .find(|u| u.id == user.id)
            .and_then(|u| u.bio)
    }

    /// New members in a group
    pub async fn on_join(&self, event: JoinEvent) {
        let gid = event.chat_id;
        let mid = event.message_id;
        let classifier = self.state.classifier();

        for user in &event.members {
            let uid = user.id;
            if self.state.is_blacklisted(uid)
                || user.is_bot
                || self.state.is_class_c(gid, uid)
                || self.state.is_class_e(gid, uid)
            {
                continue;
            }

            let name = user.full_name();
            if !name.is_empty() && classifier.is_nm_text(&name) {
                debug!("Join of {} skipped by name", uid);
                continue;
            }

            if let Some(bio) = self.bio_of(user).await {
                if classifier.is_bio_text(&bio) {
                    debug!("Join of {} skipped by bio", uid);
                    continue;
                }
            }

            self.state.record_join(uid, gid, now());

            if self.state.is_declared(gid, mid) {
                continue;
            }

            self.state.check_join_avatar(&self.exchange, gid, mid, user).await;
        }
    }

    /// An ordinary group message
    pub async fn on_group_message(&self, message: GroupMessage) {
        self.on_group_message_at(message, now()).await;
    }

    pub async fn on_group_message_at(&self, message: GroupMessage, now: Timestamp) {
        let gid = message.chat_id;
        if !self.state.init_group(gid) {
            return;
        }

        let user = &message.from;
        let uid = user.id;
        if user.is_bot
            || uid == SERVICE_USER_ID
            || self.state.is_class_c(gid, uid)
            || self.state.is_class_e(gid, uid)
            || self.state.is_blacklisted(uid)
            || self.state.is_watched(uid, now)
            || self.state.is_white(uid)
        {
            return;
        }

        self.state.record_message(uid, gid, message.message_id);
    }

    pub fn on_mention(&self, chat_id: GroupId) -> JoinHandle<()> {
        let platform = self.exchange.platform().clone();
        let flood = self.exchange.flood().clone();

        tokio::spawn(async move {
            if call(&flood, "Read mention", || platform.read_mention(chat_id)).await.value().is_none() {
                warn!("Read mention in {} error", chat_id);
            }
        })
    }

    pub fn on_message_read(&self, chat_id: GroupId) -> JoinHandle<()> {
        let platform = self.exchange.platform().clone();
        let flood = self.exchange.flood().clone();

        tokio::spawn(async move {
            if call(&flood, "Read history", || platform.read_history(chat_id)).await.value().is_none() {
                warn!("Read history in {} error", chat_id);
            }
        })
    }

    async fn update_status(&self) {
        let jitter_ms = self.status_jitter.as_millis() as u64;
        if jitter_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let platform = self.exchange.platform();
        if call(self.exchange.flood(), "Update status", || platform.update_status(true))
            .await
            .value()
            .is_none()
        {
            warn!("Update status error");
        }

        if let Err(e) = self.state.send_status(&self.exchange, "awake").await {
            warn!("Send status error: {}", e);
        }
    }

    pub async fn run_job(&self, job: JobKind) {
        self.run_job_at(job, now()).await;
    }

    /// Run one job body; failures inside are logged, never raised
    pub async fn run_job_at(&self, job: JobKind, now: Timestamp) {
        info!("Running job {}", job);
        let state = &self.state;
        let exchange = &self.exchange;

        match job {
            JobKind::UpdateStatus => self.update_status().await,
            JobKind::IntervalMin15 => {
                state.avatar_sweep(exchange, now).await;
                state.prune_watch(now);
            }
            JobKind::UpdateAdmins => {
                state.refresh_admins(exchange).await;
            }
            JobKind::SendCount => {
                state.flush_counters(exchange).await;
            }
            JobKind::BackupFiles => {
                state.backup_files(exchange).await;
            }
            JobKind::ResetData => state.reset_data().await,
            JobKind::WhitelistSweep => {
                state.whitelist_sweep(exchange, now).await;
            }
        }
    }
}
