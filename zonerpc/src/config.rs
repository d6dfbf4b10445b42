//! Runtime configuration. Plain structs with `Default` impls; this crate
//! never reads a config file itself — callers populate these however they
//! like (env, CLI flags, a config crate) and hand them to `Service::new`
//! or a concrete transport constructor.

use std::time::Duration;

use crate::wire::{HIGHEST_SUPPORTED_VERSION, LOWEST_SUPPORTED_VERSION};

/// Configuration for a [`crate::service::Service`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Lowest protocol version this service will accept from a caller.
    pub lowest_supported_version: u64,

    /// Highest protocol version this service will accept from a caller.
    pub highest_supported_version: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            lowest_supported_version: LOWEST_SUPPORTED_VERSION,
            highest_supported_version: HIGHEST_SUPPORTED_VERSION,
        }
    }
}

impl ServiceConfig {
    pub fn is_supported_version(&self, version: u64) -> bool {
        (self.lowest_supported_version..=self.highest_supported_version).contains(&version)
    }
}

/// Configuration for one [`crate::transport::Transport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long a pending transmit waits for its reply before the caller
    /// sees `TIMEOUT_ERROR`.
    pub pending_transmit_timeout: Duration,

    /// Poll burst interval used by a concrete wire's reader loop so that a
    /// shutdown request is observed promptly rather than blocking on a long
    /// read timeout.
    pub poll_burst_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pending_transmit_timeout: Duration::from_secs(30),
            poll_burst_interval: Duration::from_millis(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_config_defaults_match_the_wire_version_range() {
        let config = ServiceConfig::default();
        assert!(config.is_supported_version(LOWEST_SUPPORTED_VERSION));
        assert!(config.is_supported_version(HIGHEST_SUPPORTED_VERSION));
        assert!(!config.is_supported_version(HIGHEST_SUPPORTED_VERSION + 1));
    }

    #[test]
    fn transport_config_poll_burst_is_short() {
        let config = TransportConfig::default();
        assert!(config.poll_burst_interval < Duration::from_millis(10));
    }
}
