//! Exchange envelopes
//!
//! An envelope is the unit of communication between agents. It is a JSON
//! object with the keys `from`, `to`, `action`, `type` and `data`, posted as
//! text into the shared exchange channel. Bulk payloads (word lists, backups,
//! images) travel as a separate attachment next to the envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A typed command or data push from one agent to a set of agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating agent
    pub from: String,
    /// Receiving agents
    pub to: Vec<String>,
    /// Verb, e.g. `add`, `remove`, `update`
    pub action: String,
    /// Object of the verb, e.g. `bad`, `watch`, `avatar`
    #[serde(rename = "type")]
    pub action_type: String,
    /// Arbitrary payload
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(
        from: &str,
        to: &[&str],
        action: &str,
        action_type: &str,
        data: Value,
    ) -> Self {
        Self {
            from: from.to_string(),
            to: to.iter().map(|r| r.to_string()).collect(),
            action: action.to_string(),
            action_type: action_type.to_string(),
            data,
        }
    }

    /// Whether `agent` is one of the receivers
    pub fn is_addressed_to(&self, agent: &str) -> bool {
        self.to.iter().any(|r| r == agent)
    }

    /// Drop the sender from the receiver list; an agent never sends to itself
    pub fn strip_sender(&mut self) {
        let sender = self.from.clone();
        self.to.retain(|r| *r != sender);
    }

    /// Whether the envelope still has remote receivers
    pub fn has_receivers(&self) -> bool {
        !self.to.is_empty()
    }

    /// Serialize as 4-space indented JSON
    ///
    /// Returns `None` (and logs) if the payload cannot be serialized.
    pub fn encode(&self) -> Option<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);

        if let Err(e) = self.serialize(&mut ser) {
            warn!("Encode envelope {}/{} error: {}", self.action, self.action_type, e);
            return None;
        }

        match String::from_utf8(buf) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Encode envelope {}/{} error: {}", self.action, self.action_type, e);
                None
            }
        }
    }

    /// Parse an envelope from JSON text; `None` on absent or malformed input
    pub fn decode(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match serde_json::from_str(text) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!("Decode envelope error: {}", e);
                None
            }
        }
    }
}
