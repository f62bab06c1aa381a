//! Registry of live client connections keyed by client identity.
//!
//! A connection is registered under the first non-blank client id it
//! presents and removed when it closes, but only if the identity still maps
//! to that connection; a reconnecting client may already have replaced it.

use courier_protocol::Response;
use crossbeam::channel::Sender;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::debug;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connections");

/// Errors raised when pushing to a client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    /// No connection is registered for the client.
    #[error("client {client_id} is not connected")]
    NotConnected {
        /// Requested identity.
        client_id: String,
    },
    /// The connection closed before the message could be queued.
    #[error("connection for client {client_id} is closed")]
    Closed {
        /// Requested identity.
        client_id: String,
    },
}

#[derive(Debug)]
struct Registration {
    connection_id: u64,
    outbound: Sender<Response>,
}

/// Maps client identities to the writer queue of their connection.
#[derive(Debug, Default)]
pub struct ServerConnectionRegistry {
    connections: DashMap<String, Registration>,
}

impl ServerConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `connection_id` as the connection serving `client_id`.
    ///
    /// Blank identities are ignored. A newer connection replaces an older
    /// one for the same identity. Returns `true` when the mapping changed.
    pub fn bind(&self, client_id: &str, connection_id: u64, outbound: &Sender<Response>) -> bool {
        if client_id.trim().is_empty() {
            return false;
        }
        let registration = Registration {
            connection_id,
            outbound: outbound.clone(),
        };
        match self.connections.entry(client_id.to_owned()) {
            Entry::Occupied(entry) if entry.get().connection_id == connection_id => return false,
            Entry::Occupied(mut entry) => {
                entry.insert(registration);
            }
            Entry::Vacant(entry) => {
                entry.insert(registration);
            }
        }
        debug!(
            target: REGISTRY_TARGET,
            client_id,
            connection_id,
            "client connection registered"
        );
        true
    }

    /// Removes `client_id` if it still maps to `connection_id`.
    pub fn release(&self, client_id: &str, connection_id: u64) -> bool {
        let removed = self
            .connections
            .remove_if(client_id, |_, current| current.connection_id == connection_id)
            .is_some();
        if removed {
            debug!(
                target: REGISTRY_TARGET,
                client_id,
                connection_id,
                "client connection released"
            );
        }
        removed
    }

    /// Queues a server-initiated message for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError`] when the client has no live connection.
    pub fn push(&self, client_id: &str, response: Response) -> Result<(), PushError> {
        let outbound = self
            .connections
            .get(client_id)
            .map(|registration| registration.outbound.clone())
            .ok_or_else(|| PushError::NotConnected {
                client_id: client_id.to_owned(),
            })?;
        outbound.send(response).map_err(|_| PushError::Closed {
            client_id: client_id.to_owned(),
        })
    }

    /// Returns `true` when `client_id` has a registered connection.
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.connections.contains_key(client_id)
    }

    /// Connection currently serving `client_id`.
    #[must_use]
    pub fn connection_id(&self, client_id: &str) -> Option<u64> {
        self.connections
            .get(client_id)
            .map(|registration| registration.connection_id)
    }

    /// Number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` when no identity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
