//! Library-level configuration, kept separate from the demo binaries'
//! process-level `clap::Args`. Mirrors the donor's split between a plain
//! data struct consumed by library constructors (`TransportConfig`) and a
//! CLI-parsing struct consumed only by `main` (`cli::Args`): a caller
//! embedding this crate in its own process never needs `clap` in scope.

use std::time::Duration;

use crate::defaults;

/// Settings a caller passes into the channel/multiplexer constructors,
/// as opposed to the demo binaries' own process-level flags (log
/// verbosity, log directory, worker/request counts) which have no
/// meaning to the library itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Address to bind (server) or connect to (client).
    pub address: String,
    /// Capacity of each of the channel's outgoing/incoming queues.
    pub queue_size: usize,
    /// Per-request timeout applied uniformly by the sync multiplexer.
    pub request_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            address: defaults::ADDRESS.to_string(),
            queue_size: defaults::Q_SIZE,
            request_timeout: defaults::REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_crate_defaults() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.address, defaults::ADDRESS);
        assert_eq!(cfg.queue_size, defaults::Q_SIZE);
        assert_eq!(cfg.request_timeout, defaults::REQUEST_TIMEOUT);
    }
}
