//! Shared configuration for the courier client and server.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! TOML file (`--config-path` or `COURIER_CONFIG_PATH`), then `COURIER_*`
//! environment variables, then command-line flags. Both binaries and the
//! client library read the same [`Config`] so heartbeat and timeout settings
//! agree on either side of a connection.

mod defaults;
mod endpoint;
mod logging;
mod reconnect;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CLIENT_ID, DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_LOG_FILTER,
    DEFAULT_READ_TIMEOUT_SECS, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BACKOFF_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, DEFAULT_WORKER_THREADS,
    default_client_id, default_log_filter, default_log_filter_string, default_log_format,
    default_server_endpoint, default_worker_pool_size,
};
pub use endpoint::{EndpointParseError, ServerEndpoint};
pub use logging::{LogFormat, LogFormatParseError};
pub use reconnect::{ReconnectMode, ReconnectPolicy};

/// Resolved configuration consumed by the client and the daemon.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "COURIER")]
pub struct Config {
    /// Address the daemon listens on and the client dials.
    #[ortho_config(default = default_server_endpoint())]
    pub server_endpoint: ServerEndpoint,
    /// Logical identity of this client's connection.
    #[ortho_config(default = default_client_id())]
    pub client_id: String,
    /// Writer-idle period, in seconds, before a heartbeat is sent.
    #[ortho_config(default = DEFAULT_HEARTBEAT_INTERVAL_SECS)]
    pub heartbeat_interval_secs: u64,
    /// Reader-idle period in seconds; zero disables it.
    #[ortho_config(default = DEFAULT_READ_TIMEOUT_SECS)]
    pub read_timeout_secs: u64,
    /// Default time a caller waits for its response, in milliseconds.
    #[ortho_config(default = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,
    /// Dispatch worker count; zero selects twice the available parallelism.
    #[ortho_config(default = DEFAULT_WORKER_THREADS)]
    pub worker_threads: usize,
    /// Reaction to a fatally closed client connection.
    #[ortho_config(default = ReconnectMode::Lazy)]
    pub reconnect: ReconnectMode,
    /// Attempts made by the eager reconnect mode.
    #[ortho_config(default = DEFAULT_RECONNECT_ATTEMPTS)]
    pub reconnect_attempts: u32,
    /// First eager reconnect delay in milliseconds.
    #[ortho_config(default = DEFAULT_RECONNECT_BACKOFF_MS)]
    pub reconnect_backoff_ms: u64,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_endpoint: default_server_endpoint(),
            client_id: default_client_id(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            worker_threads: DEFAULT_WORKER_THREADS,
            reconnect: ReconnectMode::Lazy,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Address of the courier server.
    #[must_use]
    pub const fn server_endpoint(&self) -> &ServerEndpoint {
        &self.server_endpoint
    }

    /// Identity used for the client's connection and heartbeats.
    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_str()
    }

    /// Writer-idle heartbeat period.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Reader-idle period, or `None` when disabled.
    #[must_use]
    pub const fn read_timeout(&self) -> Option<Duration> {
        if self.read_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.read_timeout_secs))
        }
    }

    /// Default wait applied to pending calls.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Effective dispatch worker count.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            default_worker_pool_size()
        } else {
            self.worker_threads
        }
    }

    /// Reconnection policy derived from the reconnect settings.
    #[must_use]
    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        match self.reconnect {
            ReconnectMode::Lazy => ReconnectPolicy::lazy(),
            ReconnectMode::Eager => ReconnectPolicy::eager(
                self.reconnect_attempts,
                Duration::from_millis(self.reconnect_backoff_ms),
            ),
        }
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_read_timeout_disables_reader_idle() {
        let config = Config::default();
        assert_eq!(config.read_timeout(), None);

        let config = Config {
            read_timeout_secs: 3,
            ..Config::default()
        };
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn zero_worker_threads_uses_parallelism() {
        let config = Config::default();
        assert_eq!(config.worker_threads(), default_worker_pool_size());
        assert!(config.worker_threads() >= 2);

        let config = Config {
            worker_threads: 3,
            ..Config::default()
        };
        assert_eq!(config.worker_threads(), 3);
    }

    #[test]
    fn reconnect_policy_follows_mode() {
        let config = Config {
            reconnect: ReconnectMode::Eager,
            reconnect_attempts: 4,
            reconnect_backoff_ms: 50,
            ..Config::default()
        };
        let policy = config.reconnect_policy();
        assert!(policy.is_eager());
        assert_eq!(policy.attempts, 4);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
        assert!(!Config::default().reconnect_policy().is_eager());
    }

    #[test]
    fn heartbeat_defaults_to_thirty_seconds() {
        assert_eq!(Config::default().heartbeat_interval(), Duration::from_secs(30));
    }
}
