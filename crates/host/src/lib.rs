//! Non-blocking bridge to the native host process.
//!
//! The host cannot block while an async operation completes, so every
//! operation is issued for a request id and its result is polled for.

pub mod bridge;
pub mod http;

/// Re-export of the bridge, its options, channel trait and poll state machine.
pub use bridge::{BridgeOptions, HostBridge, HostChannel, PollState};
/// Re-export of the HTTP host channel.
pub use http::HttpHostChannel;
