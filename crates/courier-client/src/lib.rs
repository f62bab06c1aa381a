//! Client side of the courier RPC transport.
//!
//! A [`Client`] keeps one persistent connection per client identity through
//! the [`ConnectionManager`]. Requests are correlated with their responses
//! by request id in a per-connection [`CorrelationRegistry`], so many
//! threads can share a connection and responses may arrive in any order.
//! Callers block on their own [`PendingCall`] with a timeout; a timeout never
//! closes the connection.
//!
//! ```no_run
//! use courier_client::Client;
//! use courier_config::Config;
//! use serde_json::json;
//!
//! let client = Client::new(&Config::default());
//! let request = client
//!     .rpc_request("com.example.Foo", "bar")
//!     .with_parameter("int", json!(5));
//! let value = client.invoke(&request)?;
//! assert_eq!(value, json!(10));
//! # Ok::<(), courier_client::ClientError>(())
//! ```

mod client;
mod connection;
mod errors;
mod manager;
mod pending;
mod resolver;

pub use self::client::Client;
pub use self::connection::{
    CloseEvent, CloseHook, CloseReason, Connection, ConnectionSettings, ConnectionStats,
};
pub use self::errors::{CallError, ClientError};
pub use self::manager::ConnectionManager;
pub use self::pending::{CorrelationRegistry, PendingCall};
pub use self::resolver::{AddressResolver, StaticAddress};

/// Tracing target for connection lifecycle events.
pub const CONNECTION_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::connection");
