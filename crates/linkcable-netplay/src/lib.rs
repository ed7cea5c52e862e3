//! Linkcable netplay client.
//!
//! Lets independently running emulated cores share input and reset events
//! through a relay, each core applying remote events at the frame they were
//! tagged with.
//!
//! # Architecture
//!
//! - [`client`]: public entry point, owns the connection worker
//! - [`worker`]: the single thread that owns the socket
//! - `dispatch`: the thread that runs observer methods and list callbacks
//! - [`transport`]: header plus chunked body framing over a byte stream
//! - [`outbound`]: bounded byte queue between callers and the worker
//! - [`session`]: request API and inbound message dispatch
//! - [`registry`]: pending, acknowledged and attached cores
//! - [`synchronizer`]: per-core frame-gated event delivery
//! - [`engine`]: what this crate needs from the emulation engine
//! - [`observer`]: session notifications
//! - [`config`]: client settings, also usable as CLI arguments
//! - [`error`]: error types

pub mod client;
pub mod config;
mod dispatch;
pub mod engine;
pub mod error;
pub mod observer;
pub mod outbound;
pub mod registry;
pub mod session;
pub mod synchronizer;
pub mod transport;
pub mod worker;

/// In-memory core for tests, here and in downstream crates.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use client::NetplayClient;
pub use config::ClientConfig;
pub use engine::{CoreHooks, EmulatedCore};
pub use error::NetplayError;
pub use linkcable_netproto::constants::DEFAULT_PORT;
pub use observer::{ChannelObserver, InputRejection, NetplayEvent, NetplayObserver, NoopObserver};
pub use session::CoreStatus;
pub use synchronizer::PollOutcome;
pub use worker::ConnectionState;
