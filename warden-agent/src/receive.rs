//! Handlers for commands received from other agents
//!
//! Each handler decodes the envelope's `data` into a typed payload and
//! applies it. Malformed payloads surface as [`AgentError::Json`] or
//! [`AgentError::InvalidData`]; the dispatcher logs and drops them.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use warden_core::{agents, GroupId, MessageId, Timestamp, UserId, WatchEntry, WatchKind};
use warden_exchange::Exchange;

use crate::error::AgentError;
use crate::state::AppState;
use crate::trust::BadKind;

/// `{"id", "type"}`
#[derive(Debug, Clone, Deserialize)]
pub struct IdPayload {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// `{"type"}`
#[derive(Debug, Clone, Deserialize)]
pub struct TypePayload {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScorePayload {
    pub id: UserId,
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchPayload {
    pub id: UserId,
    #[serde(rename = "type")]
    pub kind: String,
    pub until: Timestamp,
}

/// A message in a group, as used by declare and deleted notices
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub group_id: GroupId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupPayload {
    pub group_id: GroupId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionAsk {
    pub admin_id: UserId,
    pub message_id: MessageId,
}

fn payload<T: DeserializeOwned>(data: &Value) -> Result<T, AgentError> {
    Ok(T::deserialize(data)?)
}

fn bad_kind(kind: &str) -> Result<BadKind, AgentError> {
    BadKind::parse(kind).ok_or_else(|| AgentError::invalid(format!("bad type {}", kind)))
}

impl AppState {
    /// `add/bad`; channel entries only when `allow_channels`
    pub fn receive_add_bad(&self, data: &Value, allow_channels: bool) -> Result<(), AgentError> {
        let p: IdPayload = payload(data)?;
        self.add_bad(p.id, bad_kind(&p.kind)?, allow_channels)
    }

    /// `remove/bad`
    pub fn receive_remove_bad(&self, data: &Value) -> Result<(), AgentError> {
        let p: IdPayload = payload(data)?;
        self.remove_bad(p.id, bad_kind(&p.kind)?);
        Ok(())
    }

    /// `add/score`, recorded under the sending agent's name
    pub fn receive_add_score(&self, sender: &str, data: &Value) -> Result<(), AgentError> {
        let p: ScorePayload = payload(data)?;
        if !p.score.is_finite() {
            return Err(AgentError::invalid(format!("score {}", p.score)));
        }
        self.set_score(p.id, sender, p.score);
        Ok(())
    }

    /// `remove/score`
    pub fn receive_remove_score(&self, data: &Value) -> Result<(), AgentError> {
        let p: IdPayload = payload(data)?;
        self.reset_user(p.id);
        Ok(())
    }

    /// `add/watch`
    pub fn receive_add_watch(&self, data: &Value) -> Result<(), AgentError> {
        let p: WatchPayload = payload(data)?;
        let kind = WatchKind::parse(&p.kind)
            .ok_or_else(|| AgentError::invalid(format!("watch type {}", p.kind)))?;

        self.add_watch(WatchEntry {
            user_id: p.id,
            kind,
            until: p.until,
        });
        Ok(())
    }

    /// `remove/watch`
    pub fn receive_remove_watch(&self, data: &Value) -> Result<(), AgentError> {
        let p: IdPayload = payload(data)?;
        self.remove_watch(p.id);
        Ok(())
    }

    /// `update/declare`
    pub fn receive_declared(&self, data: &Value) -> Result<(), AgentError> {
        let p: MessagePayload = payload(data)?;
        if !self.declare_message(p.group_id, p.message_id) {
            debug!("Declare for untracked group {}", p.group_id);
        }
        Ok(())
    }

    /// `update/deleted`
    pub fn receive_deleted(&self, data: &Value) -> Result<(), AgentError> {
        let p: MessagePayload = payload(data)?;
        self.record_deleted(p.group_id, p.message_id);
        Ok(())
    }

    /// `add/except` and `remove/except`
    pub async fn receive_except(&self, exchange: &Exchange, data: &Value, add: bool) -> Result<(), AgentError> {
        let p: IdPayload = payload(data)?;
        self.update_except(exchange, p.id, &p.kind, add).await
    }

    /// `add/white`
    pub async fn receive_add_white(&self, data: &Value) -> Result<(), AgentError> {
        let p: IdPayload = payload(data)?;
        if !self.add_white(p.id).await {
            return Err(AgentError::invalid(format!("white for blacklisted {}", p.id)));
        }
        Ok(())
    }

    /// `remove/white`
    pub async fn receive_remove_white(&self, data: &Value) -> Result<(), AgentError> {
        let p: IdPayload = payload(data)?;
        self.remove_white(p.id).await;
        Ok(())
    }

    /// `kick/user` from any agent
    pub async fn receive_kick_user(&self, data: &Value) -> Result<(), AgentError> {
        let p: IdPayload = payload(data)?;
        self.kick_user(p.id).await;
        Ok(())
    }

    /// `clear/<dataset>` with `{"type": part}`
    pub async fn receive_clear(&self, dataset: &str, data: &Value) -> Result<(), AgentError> {
        let p: TypePayload = payload(data)?;
        match dataset {
            "bad" => self.clear_bad(&p.kind),
            "except" => self.clear_except(&p.kind),
            "user" => self.clear_users(&p.kind),
            "watch" => self.clear_watch(&p.kind),
            "white" => {
                if self.clear_white(&p.kind).await {
                    Ok(())
                } else {
                    Err(AgentError::invalid(format!("white clear type {}", p.kind)))
                }
            }
            other => Err(AgentError::invalid(format!("clear {}", other))),
        }
    }

    /// `leave/approve`
    pub async fn receive_leave_approve(&self, exchange: &Exchange, data: &Value) -> Result<(), AgentError> {
        let p: GroupPayload = payload(data)?;
        self.leave_group(exchange, p.group_id).await;
        Ok(())
    }

    /// `version/ask`, answered to HIDE
    pub async fn receive_version_ask(&self, exchange: &Exchange, data: &Value) -> Result<(), AgentError> {
        let p: VersionAsk = payload(data)?;
        let to = vec![agents::HIDE.to_string()];
        exchange
            .share(
                &to,
                "version",
                "reply",
                json!({
                    "admin_id": p.admin_id,
                    "message_id": p.message_id,
                    "version": self.settings().custom.version,
                }),
            )
            .await?;
        Ok(())
    }

    /// `regex/update`: data names the dataset, the words travel as a document
    pub async fn receive_regex(
        &self,
        exchange: &Exchange,
        data: &Value,
        document: Option<&str>,
    ) -> Result<(), AgentError> {
        let name = data
            .as_str()
            .ok_or_else(|| AgentError::invalid(format!("regex data {}", data)))?;
        let file_id = document.ok_or_else(|| AgentError::MissingAttachment(name.to_string()))?;

        self.apply_rule_update(exchange, name, file_id).await?;
        Ok(())
    }

    /// `backup/rollback`: data names the dataset, the copy travels as a document
    pub async fn receive_rollback(
        &self,
        exchange: &Exchange,
        data: &Value,
        document: Option<&str>,
    ) -> Result<(), AgentError> {
        let name = data
            .as_str()
            .ok_or_else(|| AgentError::invalid(format!("rollback data {}", data)))?;
        let file_id = document.ok_or_else(|| AgentError::MissingAttachment(name.to_string()))?;

        self.rollback(exchange, name, file_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::fresh_state;
    use crate::whitelist::tests::test_exchange;
    use std::sync::Arc;
    use warden_exchange::codec;
    use warden_exchange::mock::RecordingPlatform;

    #[test]
    fn test_add_and_remove_bad() {
        let (state, _) = fresh_state();
        state.receive_add_bad(&json!({"id": 5, "type": "user"}), false).unwrap();
        assert!(state.is_blacklisted(5));

        assert!(state
            .receive_add_bad(&json!({"id": -100, "type": "channel"}), false)
            .is_err());
        assert!(state.receive_add_bad(&json!({"id": 5, "type": "group"}), true).is_err());
        assert!(state.receive_add_bad(&json!({"type": "user"}), true).is_err());

        state.receive_remove_bad(&json!({"id": 5, "type": "user"})).unwrap();
        assert!(!state.is_blacklisted(5));
    }

    #[test]
    fn test_score_and_watch() {
        let (state, _) = fresh_state();
        state
            .receive_add_score("NOSPAM", &json!({"id": 9, "score": 1.5}))
            .unwrap();
        assert_eq!(state.user(9).unwrap().score_of("NOSPAM"), 1.5);

        state
            .receive_add_watch(&json!({"id": 9, "type": "delete", "until": 500}))
            .unwrap();
        assert!(state.is_watched(9, 499));
        assert!(state
            .receive_add_watch(&json!({"id": 9, "type": "mute", "until": 500}))
            .is_err());

        state.receive_remove_watch(&json!({"id": 9})).unwrap();
        assert!(!state.is_watched(9, 0));

        state.receive_remove_score(&json!({"id": 9})).unwrap();
        assert_eq!(state.user(9).unwrap().total_score(), 0.0);
    }

    #[tokio::test]
    async fn test_clear_commands() {
        let (state, _) = fresh_state();
        state.add_bad(1, BadKind::User, false).unwrap();
        state.add_white(2).await;

        state.receive_clear("bad", &json!({"type": "users"})).await.unwrap();
        state.receive_clear("white", &json!({"type": "white"})).await.unwrap();
        assert!(!state.is_blacklisted(1));
        assert!(state.whitelist().await.white.is_empty());

        assert!(state.receive_clear("white", &json!({"type": "grey"})).await.is_err());

        state.add_bad(3, BadKind::User, false).unwrap();
        assert!(state.receive_add_white(&json!({"id": 3})).await.is_err());
        assert!(!state.is_white(3));
        assert!(state.receive_clear("rules", &json!({"type": "all"})).await.is_err());
    }

    #[tokio::test]
    async fn test_version_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());

        state
            .receive_version_ask(&exchange, &json!({"admin_id": 1, "message_id": 2}))
            .await
            .unwrap();

        let (_, text) = platform.sent_messages().remove(0);
        let envelope = codec::receive(Some(&text)).unwrap();
        assert_eq!(envelope.action, "version");
        assert_eq!(envelope.action_type, "reply");
        assert_eq!(envelope.to, vec!["HIDE".to_string()]);
        assert_eq!(envelope.data["version"], json!(state.settings().custom.version));
    }

    #[tokio::test]
    async fn test_regex_requires_document() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let exchange = test_exchange(Arc::new(RecordingPlatform::default()), dir.path());

        let result = state.receive_regex(&exchange, &json!("ban_words"), None).await;
        assert!(matches!(result, Err(AgentError::MissingAttachment(_))));
        assert!(state.receive_regex(&exchange, &json!(3), Some("f")).await.is_err());
    }
}
