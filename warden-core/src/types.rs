//! Identifier aliases and clock helpers

use chrono::Utc;

/// Platform user id
pub type UserId = i64;

/// Platform group (supergroup) id, always negative
pub type GroupId = i64;

/// Platform message id, unique within a group
pub type MessageId = i64;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Short name identifying an agent in the federation (e.g. `NOSPAM`)
pub type AgentName = String;

/// Current unix time in seconds
pub fn now() -> Timestamp {
    Utc::now().timestamp()
}
