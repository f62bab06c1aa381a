//! Error types for socket listener operations.

use std::io;
use std::net::SocketAddr;

use courier_config::ServerEndpoint;
use thiserror::Error;

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured endpoint did not resolve to a socket address.
    #[error("failed to resolve listen address {endpoint}: {source}")]
    Resolve {
        /// Endpoint that failed to resolve.
        endpoint: ServerEndpoint,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// Binding the resolved address failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    Bind {
        /// Resolved address.
        addr: SocketAddr,
        /// Bind error.
        #[source]
        source: io::Error,
    },
    /// Switching the listener to non-blocking mode failed.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The bound listener could not report its address.
    #[error("failed to read listener address: {source}")]
    LocalAddr {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be started.
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
