//! Response envelope returned by the daemon.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::request::Request;

/// Correlation id reserved for heartbeat replies.
///
/// Clients refuse to register this id for real calls, so a heartbeat reply
/// can never satisfy a pending caller.
pub const HEARTBEAT_REQUEST_ID: &str = "-99";

/// Result payload carried by every successful heartbeat reply.
pub const PING_RESULT: &str = "ping success";

/// Category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No service is registered under the requested class name.
    TargetNotFound,
    /// The service exists but exposes no matching method.
    MethodNotFound,
    /// The caller used the protocol incorrectly (bad arity or argument shape).
    UsageError,
    /// The service method itself failed.
    InvocationFailure,
    /// No response arrived in time.
    Timeout,
    /// The request kind is not recognised.
    UnsupportedKind,
}

impl FailureKind {
    /// Returns the canonical snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TargetNotFound => "target_not_found",
            Self::MethodNotFound => "method_not_found",
            Self::UsageError => "usage_error",
            Self::InvocationFailure => "invocation_failure",
            Self::Timeout => "timeout",
            Self::UnsupportedKind => "unsupported_kind",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Failure cause attached to an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    /// Creates a failure of the given kind.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// No service registered under `class_name`.
    #[must_use]
    pub fn target_not_found(class_name: &str) -> Self {
        Self::new(
            FailureKind::TargetNotFound,
            format!("no service registered for '{class_name}'"),
        )
    }

    /// Service `class_name` has no method `method_name` matching the call.
    #[must_use]
    pub fn method_not_found(class_name: &str, method_name: &str) -> Self {
        Self::new(
            FailureKind::MethodNotFound,
            format!("service '{class_name}' has no method '{method_name}'"),
        )
    }

    /// Caller-side protocol misuse.
    #[must_use]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(FailureKind::UsageError, message)
    }

    /// Failure raised by the invoked method.
    #[must_use]
    pub fn invocation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvocationFailure, message)
    }

    /// Caller gave up waiting.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// Request kind not recognised by the daemon.
    #[must_use]
    pub fn unsupported_kind(kind: &str) -> Self {
        Self::new(
            FailureKind::UnsupportedKind,
            format!("request kind '{kind}' is not supported"),
        )
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Human-readable cause.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Result of processing one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chain_id: Option<String>,
    #[serde(default)]
    chain_order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default)]
    error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<Failure>,
}

impl Response {
    /// Builds an empty successful response echoing the request's
    /// correlation and chain metadata.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self {
            request_id: request.request_id().to_owned(),
            chain_id: request.chain_id().map(str::to_owned),
            chain_order: request.chain_order(),
            service_name: request.service_name().map(str::to_owned),
            result: None,
            error: false,
            failure: None,
        }
    }

    /// Builds the reply to a heartbeat, carrying the reserved id.
    #[must_use]
    pub fn heartbeat_ack(request: &Request) -> Self {
        let mut response = Self::for_request(request).with_result(Value::from(PING_RESULT));
        response.request_id = HEARTBEAT_REQUEST_ID.to_owned();
        response
    }

    /// Bare response for a request id, without chain metadata.
    #[must_use]
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            chain_id: None,
            chain_order: 0,
            service_name: None,
            result: None,
            error: false,
            failure: None,
        }
    }

    /// Sets the result payload.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Marks the response failed with the given cause.
    #[must_use]
    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.error = true;
        self.failure = Some(failure);
        self
    }

    /// Correlation id.
    #[must_use]
    pub const fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    /// Returns `true` when this is a heartbeat reply.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.request_id == HEARTBEAT_REQUEST_ID
    }

    /// Chain identifier echoed from the request.
    #[must_use]
    pub fn chain_id(&self) -> Option<&str> {
        self.chain_id.as_deref()
    }

    /// Chain order echoed from the request.
    #[must_use]
    pub const fn chain_order(&self) -> u32 {
        self.chain_order
    }

    /// Service name echoed from the request.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Result payload.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Returns `true` when processing failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error
    }

    /// Failure cause, when processing failed.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Converts the response into its payload or failure.
    ///
    /// A successful response without a payload yields `Value::Null`. An error
    /// response without a recorded cause yields an invocation failure.
    ///
    /// # Errors
    ///
    /// Returns the attached [`Failure`] when the response is an error.
    pub fn into_result(self) -> Result<Value, Failure> {
        if self.error {
            return Err(self
                .failure
                .unwrap_or_else(|| Failure::invocation("remote call failed without a cause")));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}
