//! # Minstrel Relay
//!
//! Pulls a resolved upstream audio URL and pumps its bytes into a bounded
//! channel, surviving upstream disconnects by resuming with `Range`
//! requests under a rotated identity. The HTTP layer turns the channel's
//! receiver into a streaming response body.

mod identity;
mod relay;

pub use identity::IdentityPool;
pub use relay::{RelayConfig, RelayError, RelaySummary, StreamRelay};
