//! Rule set updates from the exchange and hit counter flushing

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use warden_core::{Category, SyncReport};
use warden_exchange::{Attachment, Exchange};

use crate::error::AgentError;
use crate::state::AppState;

/// Words carried by a rule update: a list of patterns, or a map keyed by them
fn parse_words(value: Value) -> Result<Vec<String>, AgentError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(word) => Ok(word),
                other => Err(AgentError::invalid(format!("rule {}", other))),
            })
            .collect(),
        Value::Object(map) => Ok(map.into_iter().map(|(word, _)| word).collect()),
        other => Err(AgentError::invalid(format!("rule list {}", other))),
    }
}

impl AppState {
    /// Replace a category's rules with the list in an encrypted attachment
    ///
    /// `name` is the dataset name, e.g. `ban_words`. Updates for categories
    /// this agent does not run are ignored.
    pub async fn apply_rule_update(
        &self,
        exchange: &Exchange,
        name: &str,
        file_id: &str,
    ) -> Result<Option<SyncReport>, AgentError> {
        let category = Category::from_dataset(name)?;
        if !self.rules().is_active(category) {
            debug!("Ignoring rules for inactive {}", category);
            return Ok(None);
        }

        let bytes = exchange.fetch_attachment(file_id, true).await?;
        let words = parse_words(serde_json::from_slice(&bytes)?)?;

        Ok(self.rules().sync_rules(category, words))
    }

    /// Send every active category's counters to the regex receivers
    ///
    /// Counters are zeroed before sending. Returns the number of categories
    /// delivered.
    pub async fn flush_counters(&self, exchange: &Exchange) -> usize {
        let drained = self.rules().drain_counts();

        let mut sent = 0;
        for (category, counts) in drained {
            let result = exchange
                .share_file(
                    &self.settings().receivers.regex,
                    "regex",
                    "count",
                    json!(category.dataset_name()),
                    Attachment::Json(json!(counts)),
                    true,
                )
                .await;

            match result {
                Ok(()) => sent += 1,
                Err(e) => warn!("Share {} count error: {}", category, e),
            }
        }

        info!("Flushed counters of {} categories", sent);
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::fresh_state;
    use crate::whitelist::tests::test_exchange;
    use std::collections::HashMap;
    use std::sync::Arc;
    use warden_exchange::mock::RecordingPlatform;
    use warden_exchange::{codec, AttachmentCipher};

    #[test]
    fn test_parse_words() {
        assert_eq!(parse_words(json!(["a", "b"])).unwrap(), vec!["a", "b"]);
        assert_eq!(parse_words(json!({"a": 3})).unwrap(), vec!["a"]);
        assert!(parse_words(json!([1])).is_err());
        assert!(parse_words(json!("a")).is_err());
    }

    #[tokio::test]
    async fn test_rule_update_from_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());

        let cipher = AttachmentCipher::from_password("hunter2");
        let payload = serde_json::to_vec(&json!(["free.?money", "casino"])).unwrap();
        platform.add_file("doc-1", cipher.encrypt(&payload).unwrap());

        let report = state
            .apply_rule_update(&exchange, "ban_words", "doc-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.added, 2);
        assert!(state.classifier().regex(Category::Ban, "Free-Money NOW", false).is_some());

        // inactive category, never downloaded
        let calls = platform.call_count();
        assert!(state
            .apply_rule_update(&exchange, "pho_words", "doc-1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(platform.call_count(), calls);

        assert!(state.apply_rule_update(&exchange, "porn_words", "doc-1").await.is_err());
    }

    #[tokio::test]
    async fn test_flush_is_push_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());

        state
            .rules()
            .sync_rules(Category::Ban, vec!["free.?money".to_string()]);
        state.classifier().regex(Category::Ban, "Free-Money NOW", false);
        state.classifier().regex(Category::Ban, "Free-Money NOW", false);

        let sent = state.flush_counters(&exchange).await;
        assert_eq!(sent, state.rules().categories().len());
        assert_eq!(state.rules().hits(Category::Ban, "free.?money"), Some(0));

        let cipher = AttachmentCipher::from_password("hunter2");
        let ban = platform
            .documents()
            .into_iter()
            .find(|doc| {
                codec::receive(Some(&doc.caption)).is_some_and(|e| e.data == json!("ban_words"))
            })
            .unwrap();
        let counts: HashMap<String, u64> =
            serde_json::from_slice(&cipher.decrypt(&ban.bytes).unwrap()).unwrap();
        assert_eq!(counts.get("free.?money"), Some(&2));
    }
}
