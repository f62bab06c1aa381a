//! Maps client identities to server endpoints.

use courier_config::ServerEndpoint;

/// Chooses the server endpoint for a client identity.
pub trait AddressResolver: Send + Sync {
    /// Endpoint serving `client_id`, or `None` when it has no route.
    fn resolve(&self, client_id: &str) -> Option<ServerEndpoint>;
}

/// Routes every identity to one fixed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAddress {
    endpoint: ServerEndpoint,
}

impl StaticAddress {
    /// Creates a resolver for `endpoint`.
    #[must_use]
    pub const fn new(endpoint: ServerEndpoint) -> Self {
        Self { endpoint }
    }
}

impl AddressResolver for StaticAddress {
    fn resolve(&self, _client_id: &str) -> Option<ServerEndpoint> {
        Some(self.endpoint.clone())
    }
}
