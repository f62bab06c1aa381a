//! Error types surfaced by the courier client.

use std::io;
use std::time::Duration;

use courier_protocol::{CodecError, Failure, FailureKind};
use thiserror::Error;

/// Failure of a single call on an established connection.
#[derive(Debug, Error)]
pub enum CallError {
    /// The caller stopped waiting before a response arrived.
    #[error("no response for request '{request_id}' within {timeout:?}")]
    Timeout {
        /// Correlation id of the abandoned call.
        request_id: String,
        /// Time the caller waited.
        timeout: Duration,
    },

    /// The connection saw no inbound traffic for the reader-idle period.
    #[error("connection went idle while request '{request_id}' was pending")]
    ReaderIdle {
        /// Correlation id of the failed call.
        request_id: String,
    },

    /// The server answered with an error response.
    #[error("remote call failed: {0}")]
    Remote(#[from] Failure),

    /// A call with the same id is already waiting on this connection.
    #[error("request id '{request_id}' is already pending")]
    DuplicateRequestId {
        /// Offending correlation id.
        request_id: String,
    },

    /// The id is reserved for heartbeat replies.
    #[error("request id '{request_id}' is reserved for heartbeats")]
    ReservedRequestId {
        /// Offending correlation id.
        request_id: String,
    },

    /// The connection was closed before the request could be completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Encoding or writing the request failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl CallError {
    /// Maps the error onto the wire failure taxonomy, when one applies.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Timeout { .. } | Self::ReaderIdle { .. } => Some(FailureKind::Timeout),
            Self::Remote(failure) => Some(failure.kind()),
            Self::DuplicateRequestId { .. }
            | Self::ReservedRequestId { .. }
            | Self::ConnectionClosed
            | Self::Codec(_) => None,
        }
    }

    /// Returns `true` for both caller and reader-idle timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ReaderIdle { .. })
    }
}

/// Errors raised while reaching a server or issuing a call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No endpoint is known for the client identity.
    #[error("no server endpoint configured for client '{client_id}'")]
    NoRoute {
        /// Identity that could not be routed.
        client_id: String,
    },

    /// The endpoint host could not be resolved.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// Endpoint being resolved.
        endpoint: String,
        /// Underlying resolver failure.
        #[source]
        source: io::Error,
    },

    /// The TCP connection could not be established.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint being dialled.
        endpoint: String,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },

    /// The socket could not be configured or its I/O threads started.
    #[error("failed to configure connection to {endpoint}: {source}")]
    Configure {
        /// Endpoint of the affected connection.
        endpoint: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The call itself failed.
    #[error(transparent)]
    Call(#[from] CallError),
}

impl ClientError {
    /// Returns the call failure, if this error came from a call.
    #[must_use]
    pub const fn as_call_error(&self) -> Option<&CallError> {
        match self {
            Self::Call(error) => Some(error),
            Self::NoRoute { .. }
            | Self::Resolve { .. }
            | Self::Connect { .. }
            | Self::Configure { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CallError::Timeout { request_id: "r1".to_owned(), timeout: Duration::from_millis(5) }, Some(FailureKind::Timeout))]
    #[case(CallError::ReaderIdle { request_id: "r1".to_owned() }, Some(FailureKind::Timeout))]
    #[case(CallError::Remote(Failure::usage("two arguments")), Some(FailureKind::UsageError))]
    #[case(CallError::ConnectionClosed, None)]
    fn maps_failure_kinds(#[case] error: CallError, #[case] expected: Option<FailureKind>) {
        assert_eq!(error.failure_kind(), expected);
    }

    #[test]
    fn client_error_exposes_call_error() {
        let error = ClientError::from(CallError::ConnectionClosed);
        assert!(matches!(
            error.as_call_error(),
            Some(CallError::ConnectionClosed)
        ));
    }
}
