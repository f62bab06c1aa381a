//! Request envelope sent from clients to the daemon.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a request, deciding how the daemon routes it.
///
/// Unknown wire values decode to [`RequestKind::Unsupported`] rather than
/// failing the frame, so the daemon can answer them with a structured failure
/// and keep the connection open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestKind {
    /// Liveness probe emitted by idle clients.
    Ping,
    /// Named method invoked with at most one structured argument.
    Api,
    /// Method resolved by name and declared parameter types.
    Rpc,
    /// Any kind this build does not recognise.
    Unsupported(String),
}

impl RequestKind {
    /// Returns the canonical wire spelling.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Api => "api",
            Self::Rpc => "rpc",
            Self::Unsupported(other) => other.as_str(),
        }
    }
}

impl From<String> for RequestKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ping" => Self::Ping,
            "api" => Self::Api,
            "rpc" => Self::Rpc,
            _ => Self::Unsupported(value),
        }
    }
}

impl From<RequestKind> for String {
    fn from(kind: RequestKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A single RPC attempt.
///
/// Serialised as one JSONL line. Empty optional fields are omitted on the
/// wire, so a heartbeat is just `{"client_id":"…","request_id":"","kind":"ping","chain_order":0}`.
///
/// # Example
///
/// ```
/// use courier_protocol::{Request, RequestKind};
/// use serde_json::json;
///
/// let request = Request::rpc("orders", "r1", "com.example.Foo", "bar")
///     .with_parameter("int", json!(5));
/// assert_eq!(request.kind(), &RequestKind::Rpc);
/// assert_eq!(request.parameter_types(), ["int".to_owned()]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    request_id: String,
    kind: RequestKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    class_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    method_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parameter_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chain_id: Option<String>,
    #[serde(default)]
    chain_order: u32,
}

impl Request {
    fn new(
        kind: RequestKind,
        client_id: impl Into<String>,
        request_id: impl Into<String>,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            request_id: request_id.into(),
            kind,
            class_name: class_name.into(),
            method_name: method_name.into(),
            parameter_types: Vec::new(),
            parameters: Vec::new(),
            service_name: None,
            chain_id: None,
            chain_order: 0,
        }
    }

    /// Heartbeat carrying only the client identity.
    #[must_use]
    pub fn ping(client_id: impl Into<String>) -> Self {
        Self::new(RequestKind::Ping, client_id, String::new(), "", "")
    }

    /// Call resolved by exact class name, method name and parameter types.
    #[must_use]
    pub fn rpc(
        client_id: impl Into<String>,
        request_id: impl Into<String>,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self::new(RequestKind::Rpc, client_id, request_id, class_name, method_name)
    }

    /// Call resolved by simple class name and method name.
    #[must_use]
    pub fn api(
        client_id: impl Into<String>,
        request_id: impl Into<String>,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self::new(RequestKind::Api, client_id, request_id, class_name, method_name)
    }

    /// Replaces the request kind.
    #[must_use]
    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    /// Appends one declared parameter type and its argument.
    #[must_use]
    pub fn with_parameter(mut self, parameter_type: impl Into<String>, value: Value) -> Self {
        self.parameter_types.push(parameter_type.into());
        self.parameters.push(value);
        self
    }

    /// Appends a positional argument without a declared type (API calls).
    #[must_use]
    pub fn with_argument(mut self, value: Value) -> Self {
        self.parameters.push(value);
        self
    }

    /// Attaches the logical service name echoed in the response.
    #[must_use]
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Attaches call-chain metadata.
    #[must_use]
    pub fn with_chain(mut self, chain_id: impl Into<String>, chain_order: u32) -> Self {
        self.chain_id = Some(chain_id.into());
        self.chain_order = chain_order;
        self
    }

    pub(crate) fn set_chain(&mut self, chain_id: Option<String>, chain_order: u32) {
        self.chain_id = chain_id;
        self.chain_order = chain_order;
    }

    /// Identity of the originating connection.
    #[must_use]
    pub const fn client_id(&self) -> &str {
        self.client_id.as_str()
    }

    /// Correlation key assigned by the caller.
    #[must_use]
    pub const fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    /// Dispatch kind.
    #[must_use]
    pub const fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Returns `true` for heartbeat probes.
    #[must_use]
    pub const fn is_ping(&self) -> bool {
        matches!(self.kind, RequestKind::Ping)
    }

    /// Target class name as sent by the caller.
    #[must_use]
    pub const fn class_name(&self) -> &str {
        self.class_name.as_str()
    }

    /// Class name without its package qualifier.
    #[must_use]
    pub fn simple_class_name(&self) -> &str {
        self.class_name
            .rsplit('.')
            .next()
            .unwrap_or(self.class_name.as_str())
    }

    /// Target method name.
    #[must_use]
    pub const fn method_name(&self) -> &str {
        self.method_name.as_str()
    }

    /// Declared parameter types (RPC calls).
    #[must_use]
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    /// Positional arguments.
    #[must_use]
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// Moves the positional arguments out of the request.
    #[must_use]
    pub fn take_parameters(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.parameters)
    }

    /// Logical service name, if any.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Chain identifier, if the request belongs to a traced chain.
    #[must_use]
    pub fn chain_id(&self) -> Option<&str> {
        self.chain_id.as_deref()
    }

    /// Nesting depth within the chain.
    #[must_use]
    pub const fn chain_order(&self) -> u32 {
        self.chain_order
    }
}
