//! In-memory platform that records every call

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use warden_core::{GroupId, MessageId, UserId};

use crate::platform::{ChatMember, Platform, PlatformError, PlatformUser};

/// A document posted through the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDocument {
    pub chat_id: GroupId,
    pub caption: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    messages: Vec<(GroupId, String)>,
    documents: Vec<SentDocument>,
    files: HashMap<String, Vec<u8>>,
    users: HashMap<UserId, PlatformUser>,
    admins: HashMap<GroupId, Result<Vec<ChatMember>, PlatformError>>,
    members: HashMap<(GroupId, UserId), ChatMember>,
    left: Vec<GroupId>,
    read: Vec<GroupId>,
    status: Vec<bool>,
    fail_sends: bool,
    next_id: MessageId,
}

#[derive(Default)]
pub struct RecordingPlatform {
    state: Mutex<MockState>,
    calls: AtomicUsize,
    member_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl RecordingPlatform {
    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of adapter calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    pub fn add_file(&self, file_id: &str, bytes: Vec<u8>) {
        self.state.lock().files.insert(file_id.to_string(), bytes);
    }

    pub fn add_user(&self, user: PlatformUser) {
        self.state.lock().users.insert(user.id, user);
    }

    pub fn set_admins(&self, chat_id: GroupId, admins: Vec<ChatMember>) {
        self.state.lock().admins.insert(chat_id, Ok(admins));
    }

    pub fn set_admins_error(&self, chat_id: GroupId, error: PlatformError) {
        self.state.lock().admins.insert(chat_id, Err(error));
    }

    pub fn set_member(&self, chat_id: GroupId, member: ChatMember) {
        self.state
            .lock()
            .members
            .insert((chat_id, member.user.id), member);
    }

    /// Make member lookups wait for a permit on the returned semaphore
    pub fn gate_member_lookups(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.member_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn sent_messages(&self) -> Vec<(GroupId, String)> {
        self.state.lock().messages.clone()
    }

    pub fn documents(&self) -> Vec<SentDocument> {
        self.state.lock().documents.clone()
    }

    pub fn left_chats(&self) -> Vec<GroupId> {
        self.state.lock().left.clone()
    }

    pub fn read_chats(&self) -> Vec<GroupId> {
        self.state.lock().read.clone()
    }

    pub fn status_updates(&self) -> Vec<bool> {
        self.state.lock().status.clone()
    }

    fn next_message_id(state: &mut MockState) -> MessageId {
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn send_message(&self, chat_id: GroupId, text: &str) -> Result<MessageId, PlatformError> {
        self.hit();
        let mut state = self.state.lock();
        if state.fail_sends {
            return Err(PlatformError::Other("send rejected".to_string()));
        }
        state.messages.push((chat_id, text.to_string()));
        Ok(Self::next_message_id(&mut state))
    }

    async fn send_document(
        &self,
        chat_id: GroupId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageId, PlatformError> {
        self.hit();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PlatformError::Other(e.to_string()))?;

        let mut state = self.state.lock();
        if state.fail_sends {
            return Err(PlatformError::Other("send rejected".to_string()));
        }
        state.documents.push(SentDocument {
            chat_id,
            caption: caption.to_string(),
            bytes,
        });
        Ok(Self::next_message_id(&mut state))
    }

    async fn download_media(&self, file_id: &str, dest: &Path) -> Result<PathBuf, PlatformError> {
        self.hit();
        let bytes = self
            .state
            .lock()
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| PlatformError::Other(format!("no file {}", file_id)))?;

        tokio::fs::write(dest, bytes)
            .await
            .map_err(|e| PlatformError::Other(e.to_string()))?;
        Ok(dest.to_path_buf())
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<PlatformUser>, PlatformError> {
        self.hit();
        let state = self.state.lock();
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn get_admins(&self, chat_id: GroupId) -> Result<Vec<ChatMember>, PlatformError> {
        self.hit();
        self.state
            .lock()
            .admins
            .get(&chat_id)
            .cloned()
            .unwrap_or(Err(PlatformError::Inaccessible))
    }

    async fn get_chat_member(
        &self,
        chat_id: GroupId,
        user_id: UserId,
    ) -> Result<ChatMember, PlatformError> {
        self.hit();
        let gate = self.member_gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| PlatformError::Other(e.to_string()))?;
        }

        self.state
            .lock()
            .members
            .get(&(chat_id, user_id))
            .cloned()
            .ok_or_else(|| PlatformError::Other("user not participant".to_string()))
    }

    async fn get_members(&self, chat_id: GroupId) -> Result<Vec<ChatMember>, PlatformError> {
        self.hit();
        let state = self.state.lock();
        Ok(state
            .members
            .iter()
            .filter(|((gid, _), _)| *gid == chat_id)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn leave_chat(&self, chat_id: GroupId) -> Result<(), PlatformError> {
        self.hit();
        self.state.lock().left.push(chat_id);
        Ok(())
    }

    async fn read_history(&self, chat_id: GroupId) -> Result<(), PlatformError> {
        self.hit();
        self.state.lock().read.push(chat_id);
        Ok(())
    }

    async fn read_mention(&self, chat_id: GroupId) -> Result<(), PlatformError> {
        self.hit();
        self.state.lock().read.push(chat_id);
        Ok(())
    }

    async fn update_status(&self, online: bool) -> Result<(), PlatformError> {
        self.hit();
        self.state.lock().status.push(online);
        Ok(())
    }
}
