//! Warden Agent - trust state machine and command handlers
//!
//! This crate provides:
//! - Settings loaded from TOML and validated as a whole
//! - Named dataset persistence with snapshot fallback
//! - The shared application state and its named locks
//! - User activity, scores, watch entries and the federation blacklist
//! - The two-phase whitelist workflow
//! - Admin roster refresh, avatar detection, backups and rule updates
//! - Handlers for commands received from other agents

pub mod admins;
pub mod avatar;
pub mod backup;
pub mod config;
pub mod error;
pub mod receive;
pub mod state;
pub mod store;
pub mod trust;
pub mod whitelist;
pub mod words;

pub use admins::RosterUpdate;
pub use config::{ConfigError, Settings};
pub use error::AgentError;
pub use state::{AppState, BadIds, ExceptIds, GroupSets, UserBook};
pub use store::{Dataset, DatasetStore, FileStore, MemoryStore, SharedStore, StoreError};
pub use trust::BadKind;
pub use whitelist::{SweepReport, WhitelistState};
