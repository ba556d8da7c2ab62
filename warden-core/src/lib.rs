//! Warden Core - domain model and classification engine for a federated
//! moderation agent
//!
//! This crate provides the foundational primitives:
//! - Exchange envelopes shared between agents
//! - Per-user trust records and watch entries
//! - Rule categories with hit counters and normalization tables
//! - Emoji heuristics and composite text policies

pub mod agents;
pub mod emoji;
pub mod envelope;
pub mod normalize;
pub mod policy;
pub mod rules;
pub mod types;
pub mod user;

pub use emoji::*;
pub use envelope::*;
pub use normalize::*;
pub use policy::*;
pub use rules::*;
pub use types::*;
pub use user::*;

/// Summed score at which a user counts as high-risk
pub const DEFAULT_HIGH_SCORE: f64 = 3.0;

/// Seconds a join stays "new" for avatar re-checks
pub const DEFAULT_TIME_NEW: i64 = 2_592_000;

/// Undeleted messages in one group needed for whitelist nomination
pub const DEFAULT_MESSAGE_THRESHOLD: usize = 50;

/// Platform service account that posts on behalf of linked channels
pub const SERVICE_USER_ID: UserId = 777_000;
