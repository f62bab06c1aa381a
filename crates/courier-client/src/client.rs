//! Blocking facade over the connection manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use courier_config::Config;
use courier_protocol::{ChainContext, Request, Response};
use serde_json::Value;

use crate::connection::Connection;
use crate::errors::{CallError, ClientError};
use crate::manager::ConnectionManager;
use crate::pending::PendingCall;

/// Issues requests for one client identity.
///
/// Requests are routed by their own `client_id`, falling back to the
/// client's identity when the request carries none.
#[derive(Debug)]
pub struct Client {
    client_id: String,
    manager: ConnectionManager,
    request_timeout: Duration,
    next_request: AtomicU64,
}

impl Client {
    /// Creates a client for the configured endpoint and identity.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_manager(
            config.client_id(),
            ConnectionManager::from_config(config),
            config.request_timeout(),
        )
    }

    /// Creates a client over an existing manager.
    #[must_use]
    pub fn with_manager(
        client_id: impl Into<String>,
        manager: ConnectionManager,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            manager,
            request_timeout,
            next_request: AtomicU64::new(1),
        }
    }

    /// Client identity.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Connection manager backing this client.
    #[must_use]
    pub const fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Allocates a request id unique within this client.
    #[must_use]
    pub fn next_request_id(&self) -> String {
        let sequence = self.next_request.fetch_add(1, Ordering::Relaxed);
        format!("{}-{sequence}", self.client_id)
    }

    /// Builds an RPC request stamped with this client's identity and a
    /// fresh request id.
    #[must_use]
    pub fn rpc_request(&self, class_name: &str, method_name: &str) -> Request {
        Request::rpc(
            self.client_id.as_str(),
            self.next_request_id(),
            class_name,
            method_name,
        )
    }

    /// Builds an API request stamped with this client's identity and a
    /// fresh request id.
    #[must_use]
    pub fn api_request(&self, class_name: &str, method_name: &str) -> Request {
        Request::api(
            self.client_id.as_str(),
            self.next_request_id(),
            class_name,
            method_name,
        )
    }

    /// Open connection for this client's identity.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when the server cannot be reached.
    pub fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        self.manager.get_or_create(&self.client_id)
    }

    /// Writes `request` and returns a handle to wait on.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when no connection can be obtained or the
    /// request cannot be registered or written.
    pub fn send_async(&self, request: &Request) -> Result<PendingCall, ClientError> {
        let identity = if request.client_id().is_empty() {
            self.client_id.as_str()
        } else {
            request.client_id()
        };
        let connection = self.manager.get_or_create(identity)?;
        Ok(connection.call(request)?)
    }

    /// Sends `request` and waits up to the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when sending fails or no response arrives
    /// in time. Error responses are returned as `Ok`.
    pub fn call(&self, request: &Request) -> Result<Response, ClientError> {
        self.call_with_timeout(request, self.request_timeout)
    }

    /// Sends `request` and waits up to `timeout`.
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn call_with_timeout(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let pending = self.send_async(request)?;
        Ok(pending.wait(timeout)?)
    }

    /// Sends `request` and returns its result payload.
    ///
    /// # Errors
    ///
    /// Error responses become [`CallError::Remote`].
    pub fn invoke(&self, request: &Request) -> Result<Value, ClientError> {
        let response = self.call(request)?;
        response
            .into_result()
            .map_err(|failure| ClientError::Call(CallError::Remote(failure)))
    }

    /// Sends a nested request on behalf of the request described by `chain`.
    ///
    /// The request inherits the chain id and is stamped one level deeper.
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn call_in_chain(
        &self,
        chain: &mut ChainContext,
        mut request: Request,
    ) -> Result<Response, ClientError> {
        chain.stamp(&mut request);
        self.call(&request)
    }

    /// Closes every connection of the underlying manager, including those
    /// used by other clients sharing it.
    pub fn close(&self) {
        self.manager.close_all();
    }
}
