//! Per-user trust records and watch entries

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::{GroupId, MessageId, Timestamp, UserId};

/// Everything the agent remembers about one user
///
/// Created on first observed activity and reset to the default (rather than
/// removed) when the user's score is cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Platform handle of the last seen profile photo
    #[serde(default)]
    pub avatar: String,
    /// Join time per group
    #[serde(default)]
    pub join: HashMap<GroupId, Timestamp>,
    /// Message ids seen per group
    #[serde(default)]
    pub messages: HashMap<GroupId, HashSet<MessageId>>,
    /// Score contributed by each agent
    #[serde(default)]
    pub score: HashMap<String, f64>,
}

impl UserRecord {
    /// Whether any join falls inside the "new" window
    pub fn is_join_tracked(&self, now: Timestamp, time_new: i64) -> bool {
        self.join.values().any(|&joined| now - joined < time_new)
    }

    /// Group the user joined most recently
    pub fn latest_group(&self) -> Option<GroupId> {
        self.join
            .iter()
            .max_by_key(|(_, &joined)| joined)
            .map(|(&gid, _)| gid)
    }

    /// Sum of all agents' scores
    pub fn total_score(&self) -> f64 {
        self.score.values().sum()
    }

    /// Score given by one agent
    pub fn score_of(&self, project: &str) -> f64 {
        self.score.get(project).copied().unwrap_or(0.0)
    }

    /// Messages in `gid` not reported as deleted
    pub fn undeleted_count(&self, gid: GroupId, deleted: Option<&HashSet<MessageId>>) -> usize {
        let Some(messages) = self.messages.get(&gid) else {
            return 0;
        };

        match deleted {
            Some(deleted) => messages.iter().filter(|mid| !deleted.contains(mid)).count(),
            None => messages.len(),
        }
    }

    /// Record a message id under its group
    pub fn record_message(&mut self, gid: GroupId, mid: MessageId) {
        self.messages.entry(gid).or_default().insert(mid);
    }
}

/// Kind of temporary suspicion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Ban,
    Delete,
}

impl WatchKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ban" => Some(Self::Ban),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A temporary suspicion flag received from another agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub user_id: UserId,
    pub kind: WatchKind,
    pub until: Timestamp,
}

impl WatchEntry {
    /// Active strictly before `until`
    pub fn is_active(&self, now: Timestamp) -> bool {
        now < self.until
    }
}

/// All watch entries, at most one per (user, kind)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchBook {
    #[serde(default)]
    ban: HashMap<UserId, Timestamp>,
    #[serde(default)]
    delete: HashMap<UserId, Timestamp>,
}

impl WatchBook {
    fn kind(&self, kind: WatchKind) -> &HashMap<UserId, Timestamp> {
        match kind {
            WatchKind::Ban => &self.ban,
            WatchKind::Delete => &self.delete,
        }
    }

    fn kind_mut(&mut self, kind: WatchKind) -> &mut HashMap<UserId, Timestamp> {
        match kind {
            WatchKind::Ban => &mut self.ban,
            WatchKind::Delete => &mut self.delete,
        }
    }

    /// Insert or replace the entry for (user, kind)
    pub fn set(&mut self, entry: WatchEntry) {
        self.kind_mut(entry.kind).insert(entry.user_id, entry.until);
    }

    pub fn get(&self, uid: UserId, kind: WatchKind) -> Option<WatchEntry> {
        self.kind(kind).get(&uid).map(|&until| WatchEntry {
            user_id: uid,
            kind,
            until,
        })
    }

    pub fn is_watched(&self, uid: UserId, kind: WatchKind, now: Timestamp) -> bool {
        self.get(uid, kind).is_some_and(|entry| entry.is_active(now))
    }

    pub fn is_watched_any(&self, uid: UserId, now: Timestamp) -> bool {
        self.is_watched(uid, WatchKind::Ban, now) || self.is_watched(uid, WatchKind::Delete, now)
    }

    /// Drop both entries of a user
    pub fn remove(&mut self, uid: UserId) -> bool {
        let ban = self.ban.remove(&uid).is_some();
        let delete = self.delete.remove(&uid).is_some();
        ban || delete
    }

    /// Drop expired entries, returning how many were removed
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let before = self.len();
        self.ban.retain(|_, until| now < *until);
        self.delete.retain(|_, until| now < *until);
        before - self.len()
    }

    pub fn clear(&mut self) {
        self.ban.clear();
        self.delete.clear();
    }

    pub fn clear_kind(&mut self, kind: WatchKind) {
        self.kind_mut(kind).clear();
    }

    pub fn len(&self) -> usize {
        self.ban.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_boundary() {
        let mut book = WatchBook::default();
        book.set(WatchEntry {
            user_id: 1,
            kind: WatchKind::Ban,
            until: 1000,
        });

        assert!(book.is_watched(1, WatchKind::Ban, 999));
        assert!(!book.is_watched(1, WatchKind::Ban, 1000));
        assert!(!book.is_watched(1, WatchKind::Ban, 1001));
        assert!(!book.is_watched(1, WatchKind::Delete, 999));
    }

    #[test]
    fn test_watch_single_entry_per_kind() {
        let mut book = WatchBook::default();
        book.set(WatchEntry { user_id: 7, kind: WatchKind::Delete, until: 100 });
        book.set(WatchEntry { user_id: 7, kind: WatchKind::Delete, until: 500 });

        assert_eq!(book.len(), 1);
        assert_eq!(book.get(7, WatchKind::Delete).map(|e| e.until), Some(500));
    }

    #[test]
    fn test_watch_prune() {
        let mut book = WatchBook::default();
        book.set(WatchEntry { user_id: 1, kind: WatchKind::Ban, until: 10 });
        book.set(WatchEntry { user_id: 2, kind: WatchKind::Delete, until: 50 });

        assert_eq!(book.prune(10), 1);
        assert!(book.is_watched_any(2, 10));
        assert!(!book.is_watched_any(1, 5));
    }

    #[test]
    fn test_undeleted_count() {
        let mut record = UserRecord::default();
        for mid in 1..=5 {
            record.record_message(-100, mid);
        }
        record.record_message(-100, 3);

        let deleted: HashSet<MessageId> = [2, 4, 99].into_iter().collect();
        assert_eq!(record.undeleted_count(-100, None), 5);
        assert_eq!(record.undeleted_count(-100, Some(&deleted)), 3);
        assert_eq!(record.undeleted_count(-200, Some(&deleted)), 0);
    }

    #[test]
    fn test_latest_group_and_tracking() {
        let mut record = UserRecord::default();
        record.join.insert(-1, 100);
        record.join.insert(-2, 300);

        assert_eq!(record.latest_group(), Some(-2));
        assert!(record.is_join_tracked(350, 100));
        assert!(!record.is_join_tracked(400, 100));
    }

    #[test]
    fn test_record_serde_integer_keys() {
        let mut record = UserRecord::default();
        record.join.insert(-1001, 42);
        record.score.insert("NOSPAM".to_string(), 1.5);

        let text = serde_json::to_string(&record).unwrap();
        let parsed: UserRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, record);
    }
}
