//! Two-phase whitelist promotion
//!
//! Nomination moves active, clean users into a wait set; the next sweep's
//! confirmation re-checks them (including live membership in every
//! nominating group) and promotes the survivors. A failed confirmation drops
//! the user from the wait set, so they have to be nominated again.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use warden_core::{GroupId, Timestamp, UserId, UserRecord};
use warden_exchange::{call, Exchange, Reply};

use crate::state::AppState;
use crate::store::Dataset;

/// Whitelist workflow data, guarded by the `white` lock
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhitelistState {
    /// Candidates and the groups that nominated them
    #[serde(default)]
    pub wait: HashMap<UserId, HashSet<GroupId>>,
    /// Confirmed trusted users
    #[serde(default)]
    pub white: HashSet<UserId>,
    /// Users barred from the workflow
    #[serde(default)]
    pub kicked: HashSet<UserId>,
}

impl WhitelistState {
    pub fn is_pending_or_white(&self, uid: UserId) -> bool {
        self.wait.contains_key(&uid) || self.white.contains(&uid)
    }

    /// Operator grant: clears any kick
    pub fn grant(&mut self, uid: UserId) {
        self.kicked.remove(&uid);
        self.wait.remove(&uid);
        self.white.insert(uid);
    }

    pub fn revoke(&mut self, uid: UserId) -> bool {
        let waiting = self.wait.remove(&uid).is_some();
        let white = self.white.remove(&uid);
        waiting || white
    }

    /// Bar a user from the workflow until cleared
    pub fn kick(&mut self, uid: UserId) {
        self.wait.remove(&uid);
        self.white.remove(&uid);
        self.kicked.insert(uid);
    }

    /// Clear one part (`wait`, `white`, `kicked`) or `all`
    pub fn clear(&mut self, part: &str) -> bool {
        match part {
            "wait" => self.wait.clear(),
            "white" => self.white.clear(),
            "kicked" => self.kicked.clear(),
            "all" => *self = Self::default(),
            _ => return false,
        }
        true
    }

    /// Sorted white set for broadcasting
    pub fn white_list(&self) -> Vec<UserId> {
        let mut white: Vec<UserId> = self.white.iter().copied().collect();
        white.sort();
        white
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub confirmed: Vec<UserId>,
    pub dropped: Vec<UserId>,
    pub nominated: Vec<UserId>,
}

/// Facts the disqualification checks read, captured under the locks
struct Standing<'a> {
    bad_users: &'a HashSet<UserId>,
    kicked: &'a HashSet<UserId>,
    now: Timestamp,
}

impl AppState {
    /// Whether a user fails any of the shared checks
    ///
    /// Blacklisted, at or over the high score, non-zero score on a
    /// distinguished project, watched, or kicked.
    fn is_disqualified(&self, uid: UserId, record: &UserRecord, standing: &Standing<'_>) -> bool {
        let limit = &self.settings().limit;

        standing.bad_users.contains(&uid)
            || record.total_score() >= limit.high_score
            || limit
                .zero_score_projects
                .iter()
                .any(|project| record.score_of(project) != 0.0)
            || self.watch.read().is_watched_any(uid, standing.now)
            || standing.kicked.contains(&uid)
    }

    /// Move users with enough undeleted messages into the wait set
    ///
    /// Takes the `message` lock; the caller already holds `white`.
    pub(crate) fn nominate(&self, white: &mut WhitelistState, now: Timestamp) -> Vec<UserId> {
        let threshold = self.settings().limit.message_threshold;
        let bad = self.bad.read().users.clone();
        let deleted = self.deleted.read().clone();

        let mut nominated = Vec::new();
        let mut book = self.message.lock();

        let mut uids: Vec<UserId> = book.keys().copied().collect();
        uids.sort();

        for uid in uids {
            if white.is_pending_or_white(uid) {
                continue;
            }

            let Some(record) = book.get_mut(&uid) else {
                continue;
            };

            let groups: HashSet<GroupId> = record
                .messages
                .keys()
                .copied()
                .filter(|gid| record.undeleted_count(*gid, deleted.get(gid)) > threshold)
                .collect();
            if groups.is_empty() {
                continue;
            }

            let standing = Standing {
                bad_users: &bad,
                kicked: &white.kicked,
                now,
            };
            if self.is_disqualified(uid, record, &standing) {
                continue;
            }

            record.messages.clear();
            debug!("Nominated {} from {} groups", uid, groups.len());
            white.wait.insert(uid, groups);
            nominated.push(uid);
        }

        if !nominated.is_empty() {
            self.persist(Dataset::UserIds, &*book);
        }
        nominated
    }

    /// Re-check every waiting user and promote the survivors
    ///
    /// Each user leaves the wait set whatever the outcome. Trusted group
    /// members are merged into the white set afterwards.
    pub(crate) async fn confirm(
        &self,
        exchange: &Exchange,
        white: &mut WhitelistState,
        now: Timestamp,
    ) -> (Vec<UserId>, Vec<UserId>) {
        let mut waiting: Vec<(UserId, HashSet<GroupId>)> = white.wait.drain().collect();
        waiting.sort_by_key(|(uid, _)| *uid);

        let bad = self.bad.read().users.clone();
        let records: HashMap<UserId, UserRecord> = {
            let book = self.message.lock();
            waiting
                .iter()
                .map(|(uid, _)| (*uid, book.get(uid).cloned().unwrap_or_default()))
                .collect()
        };

        let mut confirmed = Vec::new();
        let mut dropped = Vec::new();

        for (uid, groups) in waiting {
            let standing = Standing {
                bad_users: &bad,
                kicked: &white.kicked,
                now,
            };
            let record = records.get(&uid).cloned().unwrap_or_default();

            let passed = !self.is_disqualified(uid, &record, &standing)
                && self.is_member_of_all(exchange, uid, &groups).await;

            if passed {
                white.white.insert(uid);
                confirmed.push(uid);
            } else {
                dropped.push(uid);
            }
        }

        let trusted: HashSet<UserId> = self
            .trust_ids
            .read()
            .values()
            .flatten()
            .copied()
            .filter(|uid| !bad.contains(uid))
            .collect();
        white.white.extend(trusted);

        (confirmed, dropped)
    }

    async fn is_member_of_all(&self, exchange: &Exchange, uid: UserId, groups: &HashSet<GroupId>) -> bool {
        let platform = exchange.platform();

        for &gid in groups {
            match call(exchange.flood(), "Get chat member", || platform.get_chat_member(gid, uid)).await {
                Reply::Value(member) if member.is_ordinary() => {}
                Reply::Value(member) => {
                    debug!("User {} is {:?} in {}", uid, member.status, gid);
                    return false;
                }
                _ => return false,
            }
        }

        true
    }

    /// One whitelist cycle: confirm last cycle's nominees, then nominate
    ///
    /// The white set is broadcast after the confirmation pass.
    pub async fn whitelist_sweep(&self, exchange: &Exchange, now: Timestamp) -> SweepReport {
        let mut white = self.white.lock().await;

        let (confirmed, dropped) = self.confirm(exchange, &mut white, now).await;
        let nominated = self.nominate(&mut white, now);

        self.save_white(&white);
        let white_list = white.white_list();
        drop(white);

        info!(
            "Whitelist sweep: {} confirmed, {} dropped, {} nominated",
            confirmed.len(),
            dropped.len(),
            nominated.len()
        );

        if let Err(e) = exchange
            .share(&self.settings().receivers.white, "update", "white", json!(white_list))
            .await
        {
            warn!("Share white list error: {}", e);
        }

        SweepReport {
            confirmed,
            dropped,
            nominated,
        }
    }

    /// Operator grant from the exchange; refused for blacklisted users
    pub async fn add_white(&self, uid: UserId) -> bool {
        if self.is_blacklisted(uid) {
            warn!("Add white {} refused: blacklisted", uid);
            return false;
        }

        let mut white = self.white.lock().await;
        white.grant(uid);
        self.save_white(&white);
        true
    }

    pub async fn remove_white(&self, uid: UserId) {
        let mut white = self.white.lock().await;
        if white.revoke(uid) {
            self.save_white(&white);
        }
    }

    /// User kicked elsewhere in the federation
    pub async fn kick_user(&self, uid: UserId) {
        let mut white = self.white.lock().await;
        white.kick(uid);
        self.save_white(&white);
    }

    pub async fn clear_white(&self, part: &str) -> bool {
        let mut white = self.white.lock().await;
        let cleared = white.clear(part);
        if cleared {
            self.save_white(&white);
        }
        cleared
    }
}
