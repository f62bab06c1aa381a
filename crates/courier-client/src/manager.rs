//! Registry of live connections keyed by client identity.
//!
//! [`ConnectionManager::get_or_create`] holds the identity's map entry while
//! dialling, so concurrent callers for one identity share a single
//! connection. A connection that closes removes itself from the map, but
//! only while the map still points at it. Under the eager reconnect policy a
//! background thread re-dials after an unexpected close.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use courier_config::{Config, ReconnectPolicy};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use crate::CONNECTION_TARGET;
use crate::connection::{CloseEvent, Connection, ConnectionSettings};
use crate::errors::ClientError;
use crate::resolver::{AddressResolver, StaticAddress};

/// Shares one connection per client identity.
///
/// Clones share the same connections. They are closed when the last clone
/// is dropped.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connections: DashMap<String, Arc<Connection>>,
    settings: ConnectionSettings,
    policy: ReconnectPolicy,
    resolver: Arc<dyn AddressResolver>,
    closed: AtomicBool,
    handles: AtomicUsize,
}

impl ConnectionManager {
    /// Creates a manager dialling through `resolver`.
    #[must_use]
    pub fn new(
        settings: ConnectionSettings,
        policy: ReconnectPolicy,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections: DashMap::new(),
                settings,
                policy,
                resolver,
                closed: AtomicBool::new(false),
                handles: AtomicUsize::new(1),
            }),
        }
    }

    /// Creates a manager for the configured endpoint and timers.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ConnectionSettings::from_config(config),
            config.reconnect_policy(),
            Arc::new(StaticAddress::new(config.server_endpoint().clone())),
        )
    }

    /// Returns the open connection for `client_id`, dialling a new one when
    /// none exists or the existing one has closed.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when the identity has no route or the
    /// server cannot be reached.
    pub fn get_or_create(&self, client_id: &str) -> Result<Arc<Connection>, ClientError> {
        Inner::get_or_create(&self.inner, client_id)
    }

    /// Current connection for `client_id`, if any.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<Arc<Connection>> {
        self.inner
            .connections
            .get(client_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes `connection` from the registry if it is still mapped to its
    /// identity.
    pub fn remove(&self, connection: &Connection) -> bool {
        self.inner.remove_if_current(connection.client_id(), connection.id())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    /// Returns `true` when no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Closes every connection and stops eager reconnection.
    pub fn close_all(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let connections: Vec<Arc<Connection>> = self
            .inner
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for connection in connections {
            connection.close();
        }
        self.inner.connections.clear();
    }
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        self.inner.handles.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.inner.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.close_all();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectionManager")
            .field("connections", &self.inner.connections.len())
            .field("settings", &self.inner.settings)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn get_or_create(inner: &Arc<Self>, client_id: &str) -> Result<Arc<Connection>, ClientError> {
        match inner.connections.entry(client_id.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_open() {
                    return Ok(Arc::clone(occupied.get()));
                }
                let connection = Self::dial(inner, client_id)?;
                occupied.insert(Arc::clone(&connection));
                Ok(connection)
            }
            Entry::Vacant(vacant) => {
                let connection = Self::dial(inner, client_id)?;
                vacant.insert(Arc::clone(&connection));
                Ok(connection)
            }
        }
    }

    fn dial(inner: &Arc<Self>, client_id: &str) -> Result<Arc<Connection>, ClientError> {
        let endpoint = inner
            .resolver
            .resolve(client_id)
            .ok_or_else(|| ClientError::NoRoute {
                client_id: client_id.to_owned(),
            })?;
        let weak = Arc::downgrade(inner);
        Connection::open(
            client_id,
            &endpoint,
            &inner.settings,
            Some(Box::new(move |event: CloseEvent| Self::on_close(&weak, &event))),
        )
    }

    fn on_close(weak: &Weak<Self>, event: &CloseEvent) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let removed = inner.remove_if_current(&event.client_id, event.connection_id);
        if removed
            && event.reason.is_unexpected()
            && inner.policy.is_eager()
            && !inner.closed.load(Ordering::SeqCst)
        {
            Self::spawn_reconnect(&inner, event.client_id.clone());
        }
    }

    fn remove_if_current(&self, client_id: &str, connection_id: u64) -> bool {
        self.connections
            .remove_if(client_id, |_, current| current.id() == connection_id)
            .is_some()
    }

    fn spawn_reconnect(inner: &Arc<Self>, client_id: String) {
        let weak = Arc::downgrade(inner);
        let policy = inner.policy;
        let spawned = thread::Builder::new()
            .name(format!("courier-reconnect-{client_id}"))
            .spawn(move || Self::reconnect(&weak, &client_id, policy));
        if let Err(error) = spawned {
            warn!(
                target: CONNECTION_TARGET,
                error = %error,
                "failed to start reconnect thread"
            );
        }
    }

    fn reconnect(weak: &Weak<Self>, client_id: &str, policy: ReconnectPolicy) {
        for attempt in 0..policy.attempts {
            thread::sleep(policy.backoff_for(attempt));
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            match Self::get_or_create(&inner, client_id) {
                Ok(connection) => {
                    info!(
                        target: CONNECTION_TARGET,
                        client_id,
                        connection_id = connection.id(),
                        attempt,
                        "reconnected"
                    );
                    return;
                }
                Err(error) => {
                    warn!(
                        target: CONNECTION_TARGET,
                        client_id,
                        attempt,
                        error = %error,
                        "reconnect attempt failed"
                    );
                }
            }
        }
        warn!(
            target: CONNECTION_TARGET,
            client_id,
            attempts = policy.attempts,
            "giving up on reconnect"
        );
    }
}
