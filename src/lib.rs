//! # Framewire
//!
//! A bidirectional, framed message-stream library layered on top of any
//! duplex byte transport (typically TCP). It provides three composable
//! pieces: a compact binary frame codec for self-delimited messages, an
//! asynchronous channel that decouples callers from the transport via
//! bounded in/out queues serviced by dedicated reader/writer workers, and a
//! synchronous request/response multiplexer that correlates replies to
//! outstanding requests by a monotonically increasing identifier.
//!
//! A secondary static-route demultiplexer ([`router`]) is included because
//! it couples tightly to the async channel's queues.

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod mux;
pub mod router;

pub use channel::{AsyncChannel, Marshaller};
pub use codec::{Message, MAX_MESSAGE_SIZE, MESSAGE_HEADER_SIZE};
pub use config::ChannelConfig;
pub use error::{ChannelError, CodecError, Error, MuxError, Result, RouterError};
pub use mux::SyncMultiplexer;
pub use router::Router;

/// The current version of the framewire crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values shared by the demo binaries.
pub mod defaults {
    use std::time::Duration;

    /// Capacity of each of an [`crate::AsyncChannel`]'s bounded queues.
    pub const Q_SIZE: usize = crate::channel::DEFAULT_Q_SIZE;

    /// Default per-request timeout for a [`crate::SyncMultiplexer`].
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// Default bind/connect address for the demo client and server.
    pub const ADDRESS: &str = "0.0.0.0:1900";
}
