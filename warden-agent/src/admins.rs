//! Admin and trust rosters per group

use std::collections::HashSet;
use tracing::{debug, info, warn};

use warden_core::{GroupId, UserId};
use warden_exchange::{call, ChatMember, Exchange, Reply};

use crate::state::AppState;
use crate::store::Dataset;

/// Result of refreshing one group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterUpdate {
    Saved,
    Left,
    Skipped,
}

impl AppState {
    /// Members with moderation authority, the creator and federation bots
    pub fn admin_roster(&self, members: &[ChatMember]) -> HashSet<UserId> {
        members
            .iter()
            .filter(|m| {
                let human = !m.user.is_bot && !m.user.is_deleted;
                (human && m.can_moderate()) || self.bot_ids().contains(&m.user.id)
            })
            .map(|m| m.user.id)
            .collect()
    }

    /// Human admins and federation bots
    pub fn trust_roster(&self, members: &[ChatMember]) -> HashSet<UserId> {
        members
            .iter()
            .filter(|m| (!m.user.is_bot && !m.user.is_deleted) || self.bot_ids().contains(&m.user.id))
            .map(|m| m.user.id)
            .collect()
    }

    /// Replace a group's admin and trust sets from a fetched roster
    pub fn save_admins(&self, gid: GroupId, members: &[ChatMember]) {
        let admins = self.admin_roster(members);
        let trusted = self.trust_roster(members);

        {
            let mut admin_ids = self.admin_ids.write();
            admin_ids.insert(gid, admins);
            self.persist(Dataset::AdminIds, &*admin_ids);
        }

        let mut trust_ids = self.trust_ids.write();
        trust_ids.insert(gid, trusted);
        self.persist(Dataset::TrustIds, &*trust_ids);
    }

    /// Leave a group and purge everything kept for it
    pub async fn leave_group(&self, exchange: &Exchange, gid: GroupId) {
        {
            let mut left = self.left_groups.write();
            left.insert(gid);
            self.persist(Dataset::LeftGroupIds, &*left);
        }

        let platform = exchange.platform();
        if call(exchange.flood(), "Leave chat", || platform.leave_chat(gid))
            .await
            .value()
            .is_none()
        {
            warn!("Leave chat {} error", gid);
        }

        self.purge_group(gid);
        info!("Left group {}", gid);
    }

    fn purge_group(&self, gid: GroupId) {
        {
            let mut admin_ids = self.admin_ids.write();
            admin_ids.remove(&gid);
            self.persist(Dataset::AdminIds, &*admin_ids);
        }
        {
            let mut deleted = self.deleted.write();
            deleted.remove(&gid);
            self.persist(Dataset::DeletedIds, &*deleted);
        }
        {
            let mut trust_ids = self.trust_ids.write();
            trust_ids.remove(&gid);
            self.persist(Dataset::TrustIds, &*trust_ids);
        }
        self.declared.remove(&gid);
    }

    async fn refresh_group(&self, exchange: &Exchange, gid: GroupId) -> RosterUpdate {
        let platform = exchange.platform();
        match call(exchange.flood(), "Get admins", || platform.get_admins(gid)).await {
            Reply::Value(members) if members.iter().any(|m| m.user.is_self) => {
                self.save_admins(gid, &members);
                RosterUpdate::Saved
            }
            Reply::Value(_) => {
                debug!("Not an admin in {}", gid);
                RosterUpdate::Skipped
            }
            Reply::Gone => {
                self.leave_group(exchange, gid).await;
                RosterUpdate::Left
            }
            Reply::Unknown => {
                warn!("Update admin in {} error", gid);
                RosterUpdate::Skipped
            }
        }
    }

    /// Refresh the roster of every tracked group under the `admin` lock
    pub async fn refresh_admins(&self, exchange: &Exchange) -> Vec<(GroupId, RosterUpdate)> {
        let _guard = self.admin_lock.lock().await;

        let mut results = Vec::new();
        for gid in self.groups() {
            let update = self.refresh_group(exchange, gid).await;
            results.push((gid, update));
        }

        let left = results.iter().filter(|(_, u)| *u == RosterUpdate::Left).count();
        info!("Admin refresh: {} groups, {} left", results.len(), left);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::fresh_state;
    use crate::whitelist::tests::{member, test_exchange};
    use std::sync::Arc;
    use warden_exchange::mock::RecordingPlatform;
    use warden_exchange::{MemberStatus, PlatformError};

    fn admin(uid: UserId, status: MemberStatus, full: bool) -> ChatMember {
        let (_, mut m) = member(0, uid, status);
        m.can_delete_messages = full;
        m.can_restrict_members = full;
        m
    }

    #[test]
    fn test_roster_formulas() {
        let (state, _) = fresh_state();

        let mut bot = admin(200, MemberStatus::Administrator, false);
        bot.user.is_bot = true;
        let mut other_bot = admin(300, MemberStatus::Administrator, true);
        other_bot.user.is_bot = true;
        let mut ghost = admin(4, MemberStatus::Administrator, true);
        ghost.user.is_deleted = true;

        let members = vec![
            admin(1, MemberStatus::Creator, false),
            admin(2, MemberStatus::Administrator, true),
            admin(3, MemberStatus::Administrator, false),
            ghost,
            bot,
            other_bot,
        ];

        let admins = state.admin_roster(&members);
        let expected: HashSet<UserId> = [1, 2, 200].into_iter().collect();
        assert_eq!(admins, expected);

        let trusted = state.trust_roster(&members);
        let expected: HashSet<UserId> = [1, 2, 3, 200].into_iter().collect();
        assert_eq!(trusted, expected);
    }

    #[test]
    fn test_creator_must_be_human() {
        let (state, _) = fresh_state();

        let mut bot_creator = admin(400, MemberStatus::Creator, true);
        bot_creator.user.is_bot = true;
        let mut ghost_creator = admin(401, MemberStatus::Creator, true);
        ghost_creator.user.is_deleted = true;
        let plain = admin(402, MemberStatus::Member, true);

        let admins = state.admin_roster(&[bot_creator, ghost_creator, plain]);
        assert!(admins.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_saves_and_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());

        for gid in [-1, -2, -3] {
            state.init_group(gid);
        }
        state.record_deleted(-2, 9);
        state.declare_message(-2, 9);

        let mut me = admin(100, MemberStatus::Administrator, true);
        me.user.is_self = true;
        platform.set_admins(-1, vec![me, admin(5, MemberStatus::Creator, false)]);
        platform.set_admins_error(-3, PlatformError::Other("timeout".into()));

        let results = state.refresh_admins(&exchange).await;
        assert_eq!(
            results,
            vec![
                (-3, RosterUpdate::Skipped),
                (-2, RosterUpdate::Left),
                (-1, RosterUpdate::Saved),
            ]
        );

        assert!(state.admins_of(-1).contains(&5));
        assert!(state.is_left(-2));
        assert!(!state.is_deleted(-2, 9));
        assert!(!state.is_declared(-2, 9));
        assert_eq!(state.groups(), vec![-3, -1]);
        assert_eq!(platform.left_chats(), vec![-2]);
    }
}
