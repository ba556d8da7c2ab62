//! Per-user trust bookkeeping
//!
//! Activity and score live in the user book under the `message` lock. The
//! blacklist, watch entries, exceptions and message id sets each have their
//! own lock and are never held across a platform call.

use std::collections::HashSet;
use tracing::{debug, info};

use warden_core::{GroupId, MessageId, Timestamp, UserId, UserRecord, WatchEntry, WatchKind};
use warden_exchange::{call, Exchange};

use crate::error::AgentError;
use crate::state::{AppState, ExceptIds};
use crate::store::Dataset;

/// Which kind of blacklist entry a command names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadKind {
    User,
    Channel,
}

impl BadKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }
}

impl AppState {
    /// Admins, federation bots and the agent itself
    pub fn is_class_c(&self, gid: GroupId, uid: UserId) -> bool {
        self.bot_ids().contains(&uid)
            || self.settings().self_id() == Some(uid)
            || self
                .admin_ids
                .read()
                .get(&gid)
                .is_some_and(|admins| admins.contains(&uid))
    }

    /// Trusted members of the group
    pub fn is_class_e(&self, gid: GroupId, uid: UserId) -> bool {
        self.trust_ids
            .read()
            .get(&gid)
            .is_some_and(|trusted| trusted.contains(&uid))
    }

    pub fn is_blacklisted(&self, uid: UserId) -> bool {
        self.bad.read().users.contains(&uid)
    }

    pub fn is_bad_channel(&self, cid: i64) -> bool {
        self.bad.read().channels.contains(&cid)
    }

    pub fn is_watched(&self, uid: UserId, now: Timestamp) -> bool {
        self.watch.read().is_watched_any(uid, now)
    }

    /// Record a join; creates the user on first sight
    pub fn record_join(&self, uid: UserId, gid: GroupId, at: Timestamp) {
        let mut book = self.message.lock();
        book.entry(uid).or_default().join.insert(gid, at);
        self.persist(Dataset::UserIds, &*book);
    }

    /// Count a message toward the user's volume in `gid`
    pub fn record_message(&self, uid: UserId, gid: GroupId, mid: MessageId) {
        let mut book = self.message.lock();
        book.entry(uid).or_default().record_message(gid, mid);
        self.persist(Dataset::UserIds, &*book);
    }

    /// Store the score another agent assigned to a user
    pub fn set_score(&self, uid: UserId, project: &str, score: f64) {
        let mut book = self.message.lock();
        book.entry(uid)
            .or_default()
            .score
            .insert(project.to_string(), score);
        self.persist(Dataset::UserIds, &*book);
    }

    /// Reset a user's record to the empty placeholder
    pub fn reset_user(&self, uid: UserId) -> bool {
        let mut book = self.message.lock();
        let Some(record) = book.get_mut(&uid) else {
            return false;
        };

        *record = UserRecord::default();
        self.persist(Dataset::UserIds, &*book);
        true
    }

    /// Clear user records: `all` drops them, `new` forgets join times
    pub fn clear_users(&self, part: &str) -> Result<(), AgentError> {
        let mut book = self.message.lock();
        match part {
            "all" => book.clear(),
            "new" => book.values_mut().for_each(|record| record.join.clear()),
            other => return Err(AgentError::invalid(format!("user clear type {}", other))),
        }
        self.persist(Dataset::UserIds, &*book);
        Ok(())
    }

    /// Add to the blacklist; channels only when `allow_channels`
    pub fn add_bad(&self, id: i64, kind: BadKind, allow_channels: bool) -> Result<(), AgentError> {
        let mut bad = self.bad.write();
        match kind {
            BadKind::User => {
                bad.users.insert(id);
            }
            BadKind::Channel if allow_channels => {
                bad.channels.insert(id);
            }
            BadKind::Channel => return Err(AgentError::invalid("channel entries not accepted")),
        }
        self.persist(Dataset::BadIds, &*bad);
        debug!("Added bad {:?} {}", kind, id);
        Ok(())
    }

    /// Remove from the blacklist; a user also gets a fresh record
    pub fn remove_bad(&self, id: i64, kind: BadKind) {
        {
            let mut bad = self.bad.write();
            match kind {
                BadKind::User => bad.users.remove(&id),
                BadKind::Channel => bad.channels.remove(&id),
            };
            self.persist(Dataset::BadIds, &*bad);
        }

        if kind == BadKind::User {
            self.reset_user(id);
        }
    }

    /// Clear `users`, `channels` or `all`
    pub fn clear_bad(&self, part: &str) -> Result<(), AgentError> {
        let mut bad = self.bad.write();
        match part {
            "users" => bad.users.clear(),
            "channels" => bad.channels.clear(),
            "all" => {
                bad.users.clear();
                bad.channels.clear();
            }
            other => return Err(AgentError::invalid(format!("bad clear type {}", other))),
        }
        self.persist(Dataset::BadIds, &*bad);
        Ok(())
    }

    pub fn add_watch(&self, entry: WatchEntry) {
        let mut watch = self.watch.write();
        watch.set(entry);
        self.persist(Dataset::WatchIds, &*watch);
    }

    pub fn remove_watch(&self, uid: UserId) {
        let mut watch = self.watch.write();
        if watch.remove(uid) {
            self.persist(Dataset::WatchIds, &*watch);
        }
    }

    /// Clear watch entries of one kind, or `all`
    pub fn clear_watch(&self, part: &str) -> Result<(), AgentError> {
        let mut watch = self.watch.write();
        match part {
            "all" => watch.clear(),
            other => {
                let kind = WatchKind::parse(other)
                    .ok_or_else(|| AgentError::invalid(format!("watch clear type {}", other)))?;
                watch.clear_kind(kind);
            }
        }
        self.persist(Dataset::WatchIds, &*watch);
        Ok(())
    }

    /// Drop expired watch entries
    pub fn prune_watch(&self, now: Timestamp) -> usize {
        let mut watch = self.watch.write();
        let pruned = watch.prune(now);
        if pruned > 0 {
            self.persist(Dataset::WatchIds, &*watch);
            debug!("Pruned {} watch entries", pruned);
        }
        pruned
    }

    /// Register a group the agent observes, unless it was left
    pub fn init_group(&self, gid: GroupId) -> bool {
        if self.is_left(gid) {
            return false;
        }

        let mut admin_ids = self.admin_ids.write();
        if !admin_ids.contains_key(&gid) {
            admin_ids.insert(gid, HashSet::new());
            self.persist(Dataset::AdminIds, &*admin_ids);
            info!("Tracking group {}", gid);
        }
        self.declared.entry(gid).or_default();
        true
    }

    /// Another agent already handled this message
    pub fn declare_message(&self, gid: GroupId, mid: MessageId) -> bool {
        if !self.admin_ids.read().contains_key(&gid) {
            return false;
        }
        self.declared.entry(gid).or_default().insert(mid);
        true
    }

    /// A message was deleted on the platform
    pub fn record_deleted(&self, gid: GroupId, mid: MessageId) {
        let mut deleted = self.deleted.write();
        deleted.entry(gid).or_default().insert(mid);
        self.persist(Dataset::DeletedIds, &*deleted);
    }

    /// Exempt or un-exempt a user's current avatar
    ///
    /// The avatar handle is looked up on the platform outside any lock.
    pub async fn update_except(
        &self,
        exchange: &Exchange,
        uid: UserId,
        part: &str,
        add: bool,
    ) -> Result<(), AgentError> {
        if part != "long" {
            return Err(AgentError::invalid(format!("except type {}", part)));
        }

        let platform = exchange.platform();
        let ids = [uid];
        let users = call(exchange.flood(), "Get user", || platform.get_users(&ids))
            .await
            .value()
            .unwrap_or_default();

        let Some(photo) = users.into_iter().find(|u| u.id == uid).and_then(|u| u.photo) else {
            return Ok(());
        };

        let mut except = self.except.write();
        if add {
            except.long.insert(photo);
        } else {
            except.long.remove(&photo);
        }
        self.persist(Dataset::ExceptIds, &*except);
        Ok(())
    }

    pub fn clear_except(&self, part: &str) -> Result<(), AgentError> {
        let mut except = self.except.write();
        match part {
            "long" | "all" => *except = ExceptIds::default(),
            other => return Err(AgentError::invalid(format!("except clear type {}", other))),
        }
        self.persist(Dataset::ExceptIds, &*except);
        Ok(())
    }

    /// Monthly reset
    ///
    /// Takes `white` then `message`, clears blacklisted users, user records,
    /// watch entries and pending nominations.
    pub async fn reset_data(&self) {
        let mut white = self.white.lock().await;
        let mut book = self.message.lock();

        {
            let mut bad = self.bad.write();
            bad.users.clear();
            self.persist(Dataset::BadIds, &*bad);
        }

        book.clear();
        self.persist(Dataset::UserIds, &*book);

        {
            let mut watch = self.watch.write();
            watch.clear();
            self.persist(Dataset::WatchIds, &*watch);
        }

        white.wait.clear();
        self.save_white(&white);

        info!("Monthly data reset done");
    }
}
