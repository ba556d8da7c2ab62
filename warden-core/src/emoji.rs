//! Emoji heuristics
//!
//! Counts the emoji present in a text and flags it when a single emoji is
//! repeated too often or the total count is too high.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which heuristic to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmojiKind {
    /// Advertisement-like emoji flooding
    Ad,
    /// Plain emoji count
    Many,
    /// Emoji used to slip past a watch
    WatchBypass,
}

/// Trigger thresholds per heuristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiThresholds {
    pub ad_single: usize,
    pub ad_total: usize,
    pub many: usize,
    pub wb_single: usize,
    pub wb_total: usize,
}

impl Default for EmojiThresholds {
    fn default() -> Self {
        Self {
            ad_single: 15,
            ad_total: 30,
            many: 15,
            wb_single: 10,
            wb_total: 15,
        }
    }
}

/// Known emoji minus the protected ones
#[derive(Debug, Clone)]
pub struct EmojiCatalog {
    emojis: Vec<String>,
}

impl EmojiCatalog {
    /// Build from an explicit list; anything contained in `protect` is skipped
    pub fn from_list<I, S>(emojis: I, protect: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let emojis = emojis
            .into_iter()
            .map(Into::into)
            .filter(|e: &String| !e.is_empty() && !protect.contains(e.as_str()))
            .collect();
        Self { emojis }
    }

    /// The full Unicode emoji list
    pub fn standard(protect: &str) -> Self {
        Self::from_list(emojis::iter().map(|e| e.as_str()), protect)
    }

    pub fn len(&self) -> usize {
        self.emojis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emojis.is_empty()
    }

    /// Occurrences of each maximal emoji present in `text`
    ///
    /// An emoji that is part of a longer matched emoji (e.g. a base emoji
    /// inside a skin-tone sequence) is not counted on its own.
    pub fn count(&self, text: &str) -> HashMap<&str, usize> {
        let present: Vec<&str> = self
            .emojis
            .iter()
            .map(String::as_str)
            .filter(|e| text.contains(e))
            .collect();

        present
            .iter()
            .filter(|&&e| !present.iter().any(|&other| other != e && other.contains(e)))
            .map(|&e| (e, text.matches(e).count()))
            .collect()
    }

    /// Apply the heuristic of `kind` to `text`
    pub fn signal(&self, kind: EmojiKind, text: &str, thresholds: &EmojiThresholds) -> bool {
        let counts = self.count(text);
        let total: usize = counts.values().sum();
        let single = counts.values().copied().max().unwrap_or(0);

        match kind {
            EmojiKind::Ad => single >= thresholds.ad_single || total >= thresholds.ad_total,
            EmojiKind::WatchBypass => single >= thresholds.wb_single || total >= thresholds.wb_total,
            EmojiKind::Many => total >= thresholds.many,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> EmojiCatalog {
        EmojiCatalog::from_list(["🎉", "👍", "👍🏽", "🏽", "❤"], "❤")
    }

    #[test]
    fn test_ad_single_threshold() {
        let thresholds = EmojiThresholds {
            ad_single: 15,
            ad_total: 30,
            ..Default::default()
        };

        let text = format!("party {}", "🎉".repeat(15));
        assert!(catalog().signal(EmojiKind::Ad, &text, &thresholds));

        let text = format!("party {}", "🎉".repeat(14));
        assert!(!catalog().signal(EmojiKind::Ad, &text, &thresholds));
    }

    #[test]
    fn test_ad_total_threshold() {
        let thresholds = EmojiThresholds {
            ad_single: 100,
            ad_total: 6,
            ..Default::default()
        };

        let text = "🎉🎉🎉👍👍👍";
        assert!(catalog().signal(EmojiKind::Ad, text, &thresholds));
        assert!(!catalog().signal(EmojiKind::Ad, "🎉🎉👍👍", &thresholds));
    }

    #[test]
    fn test_maximal_matches_only() {
        let cat = catalog();
        let counts = cat.count("👍🏽👍🏽");
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get("👍🏽"), Some(&2));
    }

    #[test]
    fn test_protected_emoji_ignored() {
        let thresholds = EmojiThresholds {
            many: 3,
            ..Default::default()
        };
        assert!(!catalog().signal(EmojiKind::Many, "❤❤❤❤", &thresholds));
        assert!(catalog().signal(EmojiKind::Many, "🎉👍🎉", &thresholds));
    }

    #[test]
    fn test_standard_catalog_loads() {
        let catalog = EmojiCatalog::standard("");
        assert!(catalog.len() > 1000);
        assert_eq!(catalog.count("ok 🎉").get("🎉"), Some(&1));
    }
}
