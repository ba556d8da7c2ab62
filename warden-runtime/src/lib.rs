//! Warden Runtime - routing and scheduling around the agent state
//!
//! Provides:
//! - The static dispatch table for exchange envelopes
//! - Named job kinds for an external scheduler
//! - [`Node`], which turns platform events and jobs into agent calls

pub mod jobs;
pub mod node;
pub mod router;

pub use jobs::{JobKind, UnknownJob};
pub use node::{GroupMessage, JoinEvent, Node};
pub use router::{route_envelope, Handler, Route, REVERSE_ROUTES, ROUTES};
