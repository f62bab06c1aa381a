//! Request dispatch: service registry, worker pool and per-connection loop.
//!
//! Requests are classified by kind. Heartbeats are acknowledged with the
//! reserved sentinel id. RPC requests resolve a service by its fully
//! qualified class name and a method by name and parameter types; API
//! requests resolve a service by simple class name and take at most one
//! argument. Every outcome, including service panics, becomes exactly one
//! [`courier_protocol::Response`].

mod dispatcher;
mod errors;
pub(crate) mod handler;
mod pool;
mod service;

pub use self::dispatcher::Dispatcher;
pub use self::errors::DispatchFailure;
pub use self::pool::{PoolError, WorkerPool};
pub use self::service::{
    Binary, BoxError, CallContext, Nullary, RegisteredMethod, Service, ServiceError,
    ServiceMethod, ServiceRegistry, Unary, binary, nullary, unary,
};

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
