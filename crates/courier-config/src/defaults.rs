use std::num::NonZeroUsize;
use std::thread;

use crate::endpoint::ServerEndpoint;

/// Default server host.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8888;

/// Default client identity used when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "courier-client";

/// Writer-idle period after which the client emits a heartbeat.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Reader-idle period; zero disables reader-idle detection.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 0;

/// Default time a caller waits for a correlated response.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Worker pool size; zero selects twice the available parallelism.
pub const DEFAULT_WORKER_THREADS: usize = 0;

/// Number of eager reconnect attempts before giving up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Initial eager reconnect backoff.
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 200;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default server endpoint shared by the client and the daemon.
pub fn default_server_endpoint() -> ServerEndpoint {
    ServerEndpoint::tcp(DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT)
}

/// Owned default client identity.
pub fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_owned()
}

/// Worker pool size used when the configuration leaves it at zero.
pub fn default_worker_pool_size() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_mul(2)
}
