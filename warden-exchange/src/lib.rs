//! Warden Exchange - platform adapter contract and the inter-agent exchange
//!
//! Provides:
//! - The chat-platform adapter trait with a flood-wait retry contract
//! - Attachment encryption shared by all agents
//! - The `<pre>`-wrapped JSON wire form of envelopes
//! - Transmission with attachment staging and cleanup

pub mod codec;
pub mod crypto;
pub mod platform;
pub mod transmit;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use codec::*;
pub use crypto::*;
pub use platform::*;
pub use transmit::*;
