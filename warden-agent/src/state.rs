//! Application state shared by event handlers and scheduled jobs
//!
//! Each resource domain has its own lock:
//! - `admin`: serializes roster refreshes (held across platform calls)
//! - `message`: user records (join, messages, score, avatar)
//! - `receive`: serializes inbound envelope dispatch
//! - `regex`: rule sets and counters, inside [`RuleBook`]
//! - `white`: whitelist workflow state (held across platform calls)
//!
//! When `white` and `message` are both needed, `white` is taken first.
//! Message handling reads the white set from a snapshot republished on every
//! whitelist save, so it never waits on `white`.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use warden_core::{
    Category, Classifier, EmojiCatalog, GroupId, MessageId, RuleBook, RuleEntry, RulePersist,
    TextNormalizer, UserId, UserRecord, WatchBook,
};

use crate::config::Settings;
use crate::error::AgentError;
use crate::store::{self, Dataset, SharedStore, StoreError};
use crate::whitelist::WhitelistState;

/// User records keyed by id
pub type UserBook = HashMap<UserId, UserRecord>;

/// A set of ids per group
pub type GroupSets<T> = HashMap<GroupId, HashSet<T>>;

/// Federation-wide blacklist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BadIds {
    #[serde(default)]
    pub channels: HashSet<i64>,
    #[serde(default)]
    pub users: HashSet<UserId>,
}

/// Avatar handles exempt from sharing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptIds {
    #[serde(default)]
    pub long: HashSet<String>,
}

/// Persists rule sets whenever their rules or counters change
struct RuleStore(SharedStore);

impl RulePersist for RuleStore {
    fn persist(&self, category: Category, entries: &[RuleEntry]) {
        if let Err(e) = store::save(self.0.as_ref(), &category.dataset_name(), entries) {
            warn!("Save {} error: {}", category.dataset_name(), e);
        }
    }
}

pub struct AppState {
    settings: Arc<Settings>,
    store: SharedStore,
    classifier: Classifier,
    bot_ids: HashSet<UserId>,

    pub(crate) admin_lock: tokio::sync::Mutex<()>,
    receive_lock: tokio::sync::Mutex<()>,
    pub(crate) white: tokio::sync::Mutex<WhitelistState>,
    white_view: RwLock<HashSet<UserId>>,
    pub(crate) message: Mutex<UserBook>,

    pub(crate) admin_ids: RwLock<GroupSets<UserId>>,
    pub(crate) trust_ids: RwLock<GroupSets<UserId>>,
    pub(crate) bad: RwLock<BadIds>,
    pub(crate) watch: RwLock<WatchBook>,
    pub(crate) except: RwLock<ExceptIds>,
    pub(crate) deleted: RwLock<GroupSets<MessageId>>,
    pub(crate) left_groups: RwLock<HashSet<GroupId>>,
    pub(crate) declared: DashMap<GroupId, HashSet<MessageId>>,
}

impl AppState {
    /// Load every dataset; any dataset with both copies unreadable is fatal
    pub fn load(settings: Settings, store: SharedStore) -> Result<Self, StoreError> {
        let s = store.as_ref();

        let rules = Arc::new(RuleBook::new(Arc::new(RuleStore(store.clone()))));
        for category in &settings.mode.categories {
            let entries: Vec<RuleEntry> = store::load(s, &category.dataset_name())?;
            rules.load(*category, entries);
        }

        let classifier = Classifier::new(
            rules,
            EmojiCatalog::standard(&settings.emoji.protect),
            settings.emoji.thresholds(),
            TextNormalizer::new(settings.language.normalize),
        );

        let white: WhitelistState = store::load(s, &Dataset::WhiteIds.name())?;

        let state = Self {
            bot_ids: settings.bot_ids(),
            classifier,
            admin_lock: tokio::sync::Mutex::new(()),
            receive_lock: tokio::sync::Mutex::new(()),
            white_view: RwLock::new(white.white.clone()),
            white: tokio::sync::Mutex::new(white),
            message: Mutex::new(store::load(s, &Dataset::UserIds.name())?),
            admin_ids: RwLock::new(store::load(s, &Dataset::AdminIds.name())?),
            trust_ids: RwLock::new(store::load(s, &Dataset::TrustIds.name())?),
            bad: RwLock::new(store::load(s, &Dataset::BadIds.name())?),
            watch: RwLock::new(store::load(s, &Dataset::WatchIds.name())?),
            except: RwLock::new(store::load(s, &Dataset::ExceptIds.name())?),
            deleted: RwLock::new(store::load(s, &Dataset::DeletedIds.name())?),
            left_groups: RwLock::new(store::load(s, &Dataset::LeftGroupIds.name())?),
            declared: DashMap::new(),
            settings: Arc::new(settings),
            store,
        };

        for gid in state.admin_ids.read().keys() {
            state.declared.insert(*gid, HashSet::new());
        }

        info!(
            "Loaded state: {} groups, {} users, {} rule categories",
            state.admin_ids.read().len(),
            state.message.lock().len(),
            state.rules().categories().len()
        );
        Ok(state)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn rules(&self) -> &Arc<RuleBook> {
        self.classifier.rules()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn bot_ids(&self) -> &HashSet<UserId> {
        &self.bot_ids
    }

    /// Serializes inbound envelope handling
    pub fn receive_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.receive_lock
    }

    /// Save a dataset, logging failures; the previous copy stays on disk
    pub(crate) fn persist<T: Serialize + ?Sized>(&self, dataset: Dataset, value: &T) {
        if let Err(e) = store::save(self.store.as_ref(), &dataset.name(), value) {
            warn!("Save {} error: {}", dataset, e);
        }
    }

    pub fn user(&self, uid: UserId) -> Option<UserRecord> {
        self.message.lock().get(&uid).cloned()
    }

    pub fn admins_of(&self, gid: GroupId) -> HashSet<UserId> {
        self.admin_ids.read().get(&gid).cloned().unwrap_or_default()
    }

    pub fn trusted_of(&self, gid: GroupId) -> HashSet<UserId> {
        self.trust_ids.read().get(&gid).cloned().unwrap_or_default()
    }

    /// Groups with a tracked roster
    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.admin_ids.read().keys().copied().collect();
        groups.sort();
        groups
    }

    pub fn is_left(&self, gid: GroupId) -> bool {
        self.left_groups.read().contains(&gid)
    }

    pub fn is_declared(&self, gid: GroupId, mid: MessageId) -> bool {
        self.declared
            .get(&gid)
            .is_some_and(|mids| mids.contains(&mid))
    }

    pub fn is_deleted(&self, gid: GroupId, mid: MessageId) -> bool {
        self.deleted
            .read()
            .get(&gid)
            .is_some_and(|mids| mids.contains(&mid))
    }

    pub fn except_ids(&self) -> ExceptIds {
        self.except.read().clone()
    }

    /// Save the whitelist and republish the white snapshot
    pub(crate) fn save_white(&self, white: &WhitelistState) {
        *self.white_view.write() = white.white.clone();
        self.persist(Dataset::WhiteIds, white);
    }

    /// Whether `uid` is white as of the last whitelist save
    pub fn is_white(&self, uid: UserId) -> bool {
        self.white_view.read().contains(&uid)
    }

    pub async fn whitelist(&self) -> WhitelistState {
        self.white.lock().await.clone()
    }

    /// Current value of a dataset as JSON
    pub async fn dataset_value(&self, dataset: Dataset) -> Result<Value, AgentError> {
        let value = match dataset {
            Dataset::AdminIds => serde_json::to_value(&*self.admin_ids.read())?,
            Dataset::BadIds => serde_json::to_value(&*self.bad.read())?,
            Dataset::DeletedIds => serde_json::to_value(&*self.deleted.read())?,
            Dataset::ExceptIds => serde_json::to_value(&*self.except.read())?,
            Dataset::LeftGroupIds => serde_json::to_value(&*self.left_groups.read())?,
            Dataset::TrustIds => serde_json::to_value(&*self.trust_ids.read())?,
            Dataset::UserIds => serde_json::to_value(&*self.message.lock())?,
            Dataset::WatchIds => serde_json::to_value(&*self.watch.read())?,
            Dataset::WhiteIds => {
                let white = self.white.lock().await;
                serde_json::to_value(&*white)?
            }
            Dataset::Words(category) => {
                let entries = self
                    .rules()
                    .entries(category)
                    .ok_or_else(|| AgentError::InactiveCategory(category.name()))?;
                serde_json::to_value(entries)?
            }
        };
        Ok(value)
    }

    /// Replace a dataset wholesale and persist it
    pub async fn restore(&self, dataset: Dataset, bytes: &[u8]) -> Result<(), AgentError> {
        match dataset {
            Dataset::AdminIds => {
                let value: GroupSets<UserId> = serde_json::from_slice(bytes)?;
                let mut admin_ids = self.admin_ids.write();
                *admin_ids = value;
                self.persist(dataset, &*admin_ids);
            }
            Dataset::BadIds => {
                let value: BadIds = serde_json::from_slice(bytes)?;
                let mut bad = self.bad.write();
                *bad = value;
                self.persist(dataset, &*bad);
            }
            Dataset::DeletedIds => {
                let value: GroupSets<MessageId> = serde_json::from_slice(bytes)?;
                let mut deleted = self.deleted.write();
                *deleted = value;
                self.persist(dataset, &*deleted);
            }
            Dataset::ExceptIds => {
                let value: ExceptIds = serde_json::from_slice(bytes)?;
                let mut except = self.except.write();
                *except = value;
                self.persist(dataset, &*except);
            }
            Dataset::LeftGroupIds => {
                let value: HashSet<GroupId> = serde_json::from_slice(bytes)?;
                let mut left = self.left_groups.write();
                *left = value;
                self.persist(dataset, &*left);
            }
            Dataset::TrustIds => {
                let value: GroupSets<UserId> = serde_json::from_slice(bytes)?;
                let mut trust_ids = self.trust_ids.write();
                *trust_ids = value;
                self.persist(dataset, &*trust_ids);
            }
            Dataset::UserIds => {
                let value: UserBook = serde_json::from_slice(bytes)?;
                let mut book = self.message.lock();
                *book = value;
                self.persist(dataset, &*book);
            }
            Dataset::WatchIds => {
                let value: WatchBook = serde_json::from_slice(bytes)?;
                let mut watch = self.watch.write();
                *watch = value;
                self.persist(dataset, &*watch);
            }
            Dataset::WhiteIds => {
                let value: WhitelistState = serde_json::from_slice(bytes)?;
                let mut white = self.white.lock().await;
                *white = value;
                self.save_white(&white);
            }
            Dataset::Words(category) => {
                if !self.rules().is_active(category) {
                    return Err(AgentError::InactiveCategory(category.name()));
                }
                let entries: Vec<RuleEntry> = serde_json::from_slice(bytes)?;
                self.persist(dataset, &entries);
                self.rules().load(category, entries);
            }
        }

        info!("Restored dataset {}", dataset);
        Ok(())
    }
}
