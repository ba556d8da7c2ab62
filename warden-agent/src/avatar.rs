//! Avatar change detection
//!
//! The stored avatar handle is swapped under the `message` lock; the image is
//! downloaded and shared afterwards, and a failed share never rolls the
//! handle back.

use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use warden_core::{GroupId, MessageId, Timestamp, UserId};
use warden_exchange::{call, Attachment, Exchange, PlatformUser};

use crate::error::AgentError;
use crate::state::AppState;
use crate::store::Dataset;

/// Concurrent profile lookups during a sweep
const LOOKUP_CONCURRENCY: usize = 4;

impl AppState {
    /// Store `photo` as the user's avatar; `true` when it changed
    ///
    /// Exempt avatars are never stored or shared.
    pub fn swap_avatar(&self, uid: UserId, photo: &str) -> bool {
        if self.except.read().long.contains(photo) {
            return false;
        }

        let mut book = self.message.lock();
        let record = book.entry(uid).or_default();
        if record.avatar == photo {
            return false;
        }

        record.avatar = photo.to_string();
        self.persist(Dataset::UserIds, &*book);
        true
    }

    /// Download an avatar and send it to the avatar receivers
    pub async fn share_avatar(
        &self,
        exchange: &Exchange,
        gid: GroupId,
        uid: UserId,
        mid: MessageId,
        photo: &str,
    ) -> Result<(), AgentError> {
        let image = exchange.fetch_attachment(photo, false).await?;
        exchange
            .share_file(
                &self.settings().receivers.avatar,
                "update",
                "avatar",
                json!({
                    "group_id": gid,
                    "user_id": uid,
                    "message_id": mid,
                }),
                Attachment::Bytes(image),
                true,
            )
            .await?;
        Ok(())
    }

    /// Avatar check for a user who just joined `gid` with message `mid`
    pub async fn check_join_avatar(&self, exchange: &Exchange, gid: GroupId, mid: MessageId, user: &PlatformUser) {
        let Some(photo) = user.photo.as_deref() else {
            return;
        };

        if !self.swap_avatar(user.id, photo) {
            return;
        }

        if let Err(e) = self.share_avatar(exchange, gid, user.id, mid, photo).await {
            warn!("Share avatar of {} error: {}", user.id, e);
        }
    }

    /// Re-check the avatar of every recently joined, non-blacklisted user
    ///
    /// Returns how many changed avatars were shared.
    pub async fn avatar_sweep(&self, exchange: &Exchange, now: Timestamp) -> usize {
        let time_new = self.settings().time.time_new;
        let bad = self.bad.read().users.clone();

        let candidates: Vec<(UserId, GroupId)> = {
            let book = self.message.lock();
            let mut candidates: Vec<(UserId, GroupId)> = book
                .iter()
                .filter(|(uid, record)| !bad.contains(uid) && record.is_join_tracked(now, time_new))
                .filter_map(|(uid, record)| record.latest_group().map(|gid| (*uid, gid)))
                .collect();
            candidates.sort();
            candidates
        };

        if candidates.is_empty() {
            return 0;
        }
        debug!("Avatar sweep over {} users", candidates.len());

        let platform = exchange.platform();
        let lookups: Vec<(UserId, GroupId, Option<PlatformUser>)> = stream::iter(candidates)
            .map(|(uid, gid)| async move {
                let ids = [uid];
                let user = call(exchange.flood(), "Get user", || platform.get_users(&ids))
                    .await
                    .value()
                    .and_then(|users| users.into_iter().find(|u| u.id == uid));
                (uid, gid, user)
            })
            .buffer_unordered(LOOKUP_CONCURRENCY)
            .collect()
            .await;

        let mut shared = 0;
        for (uid, gid, user) in lookups {
            let Some(photo) = user.and_then(|u| u.photo) else {
                continue;
            };

            if self.is_blacklisted(uid) || !self.swap_avatar(uid, &photo) {
                continue;
            }

            match self.share_avatar(exchange, gid, uid, 0, &photo).await {
                Ok(()) => shared += 1,
                Err(e) => warn!("Share avatar of {} error: {}", uid, e),
            }
        }

        if shared > 0 {
            info!("Shared {} changed avatars", shared);
        }
        shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::fresh_state;
    use crate::whitelist::tests::test_exchange;
    use std::sync::Arc;
    use warden_exchange::mock::RecordingPlatform;
    use warden_exchange::{codec, AttachmentCipher};

    fn user_with_photo(uid: UserId, photo: &str) -> PlatformUser {
        PlatformUser {
            id: uid,
            photo: Some(photo.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_swap_avatar() {
        let (state, _) = fresh_state();
        assert!(state.swap_avatar(1, "a"));
        assert!(!state.swap_avatar(1, "a"));
        assert!(state.swap_avatar(1, "b"));

        state.except.write().long.insert("c".to_string());
        assert!(!state.swap_avatar(1, "c"));
        assert_eq!(state.user(1).unwrap().avatar, "b");
    }

    #[tokio::test]
    async fn test_sweep_shares_changed_avatars() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());

        platform.add_user(user_with_photo(1, "p1"));
        platform.add_user(user_with_photo(2, "p2"));
        platform.add_user(user_with_photo(3, "p3"));
        platform.add_file("p1", b"jpeg-1".to_vec());
        platform.add_file("p3", b"jpeg-3".to_vec());

        state.record_join(1, -10, 1_000);
        state.record_join(1, -20, 1_500);
        state.record_join(2, -10, 1_000);
        state.record_join(3, -10, 1_000);
        state.add_bad(3, crate::trust::BadKind::User, false).unwrap();

        let shared = state.avatar_sweep(&exchange, 2_000).await;
        assert_eq!(shared, 1);

        // p2 could not be downloaded; the handle is kept anyway
        assert_eq!(state.user(2).unwrap().avatar, "p2");
        assert_eq!(state.user(3).unwrap().avatar, "");

        let documents = platform.documents();
        assert_eq!(documents.len(), 1);
        let envelope = codec::receive(Some(&documents[0].caption)).unwrap();
        assert_eq!(envelope.to, vec!["NOSPAM".to_string()]);
        assert_eq!(envelope.data["group_id"], -20);
        assert_eq!(envelope.data["message_id"], 0);

        let cipher = AttachmentCipher::from_password("hunter2");
        assert_eq!(cipher.decrypt(&documents[0].bytes).unwrap(), b"jpeg-1");

        assert_eq!(state.avatar_sweep(&exchange, 2_000).await, 0);
    }

    #[tokio::test]
    async fn test_join_avatar_uses_message_id() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = fresh_state();
        let platform = Arc::new(RecordingPlatform::default());
        let exchange = test_exchange(platform.clone(), dir.path());
        platform.add_file("p1", b"jpeg".to_vec());

        state
            .check_join_avatar(&exchange, -10, 77, &user_with_photo(1, "p1"))
            .await;

        let documents = platform.documents();
        assert_eq!(documents.len(), 1);
        let envelope = codec::receive(Some(&documents[0].caption)).unwrap();
        assert_eq!(envelope.data["message_id"], 77);
    }
}
