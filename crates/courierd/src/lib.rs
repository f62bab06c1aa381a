//! Courier server.
//!
//! The server accepts persistent TCP connections carrying JSON Lines
//! requests, dispatches each request to a registered service on a worker
//! pool, and writes one correlated response per request. Lifecycle events
//! are surfaced through a [`HealthReporter`] and structured `tracing`
//! output configured from [`courier_config::Config`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courierd::dispatch::{Service, ServiceRegistry, unary};
//! use courierd::{StructuredHealthReporter, SystemConfigLoader, bootstrap_with};
//!
//! let mut services = ServiceRegistry::new();
//! services.register(
//!     Service::new("com.example.Foo")
//!         .method("bar", &["int"], unary(|_context, value: i64| Ok(value * 2))),
//! );
//! let server = bootstrap_with(
//!     &SystemConfigLoader,
//!     Arc::new(StructuredHealthReporter::new()),
//!     services,
//! )?;
//! let handle = server.serve()?;
//! handle.join()?;
//! # Ok::<(), courierd::BootstrapError>(())
//! ```

mod bootstrap;
mod connections;
pub mod dispatch;
mod echo;
mod health;
pub mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Server, ServerHandle, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use connections::{PushError, ServerConnectionRegistry};
pub use echo::{ECHO_SERVICE, echo_service};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
