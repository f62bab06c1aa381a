//! Explicit registry of dispatchable services.
//!
//! A [`Service`] groups methods under a fully qualified class name. Each
//! method is registered with its name, its declared parameter types, and a
//! [`ServiceMethod`] handler. RPC requests match a method by name and
//! parameter types; API requests match the first method with the requested
//! name.
//!
//! Handlers usually come from the typed adapters [`nullary`], [`unary`] and
//! [`binary`], which decode JSON arguments into Rust values and encode the
//! return value:
//!
//! ```
//! use courierd::dispatch::{Service, ServiceRegistry, unary};
//!
//! let mut registry = ServiceRegistry::new();
//! registry.register(
//!     Service::new("com.example.Foo")
//!         .method("bar", &["int"], unary(|_context, value: i64| Ok(value * 2))),
//! );
//! assert!(registry.find("com.example.Foo").is_some());
//! assert!(registry.find_simple("Foo").is_some());
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use courier_protocol::{ChainContext, Request};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Boxed error raised by service code.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure returned by a [`ServiceMethod`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The arguments do not fit the method's parameters.
    #[error("invalid arguments: {0}")]
    Arguments(String),
    /// The service ran and failed.
    #[error(transparent)]
    Failed(BoxError),
}

impl ServiceError {
    /// Wraps an error raised by service code.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }

    /// Innermost cause of the failure, used as the reported message.
    #[must_use]
    pub fn root_cause(&self) -> String {
        match self {
            Self::Arguments(message) => message.clone(),
            Self::Failed(error) => {
                let mut current: &(dyn StdError + 'static) = &**error;
                while let Some(next) = current.source() {
                    current = next;
                }
                current.to_string()
            }
        }
    }
}

/// Per-call view handed to service handlers.
///
/// Carries the identity of the request being served and the chain context
/// established for it. Nested requests issued by the handler should be
/// stamped through [`CallContext::stamp`] so they join the chain.
#[derive(Debug)]
pub struct CallContext<'a> {
    request: &'a Request,
    chain: &'a mut ChainContext,
}

impl<'a> CallContext<'a> {
    pub(crate) const fn new(request: &'a Request, chain: &'a mut ChainContext) -> Self {
        Self { request, chain }
    }

    /// Identity of the calling connection.
    #[must_use]
    pub const fn client_id(&self) -> &str {
        self.request.client_id()
    }

    /// Correlation id of the request being served.
    #[must_use]
    pub const fn request_id(&self) -> &str {
        self.request.request_id()
    }

    /// Chain the request belongs to.
    #[must_use]
    pub const fn chain(&self) -> &ChainContext {
        self.chain
    }

    /// Stamps a nested outbound request one level deeper in the chain.
    pub fn stamp(&mut self, request: &mut Request) {
        self.chain.stamp(request);
    }
}

/// A dispatchable method body.
pub trait ServiceMethod: Send + Sync {
    /// Invokes the method with the raw request arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Arguments`] when the arguments do not fit the
    /// method, or [`ServiceError::Failed`] when the method itself fails.
    fn invoke(
        &self,
        context: &mut CallContext<'_>,
        arguments: Vec<Value>,
    ) -> Result<Value, ServiceError>;
}

/// Adapter for methods without parameters. See [`nullary`].
pub struct Nullary<F, R> {
    handler: F,
    _result: PhantomData<fn() -> R>,
}

/// Adapter for one-parameter methods. See [`unary`].
pub struct Unary<F, A, R> {
    handler: F,
    _signature: PhantomData<fn(A) -> R>,
}

/// Adapter for two-parameter methods. See [`binary`].
pub struct Binary<F, A, B, R> {
    handler: F,
    _signature: PhantomData<fn(A, B) -> R>,
}

/// Wraps a handler taking no arguments.
pub const fn nullary<F, R>(handler: F) -> Nullary<F, R>
where
    F: Fn(&mut CallContext<'_>) -> Result<R, ServiceError> + Send + Sync,
    R: Serialize,
{
    Nullary {
        handler,
        _result: PhantomData,
    }
}

/// Wraps a handler taking one JSON-decoded argument.
pub const fn unary<F, A, R>(handler: F) -> Unary<F, A, R>
where
    F: Fn(&mut CallContext<'_>, A) -> Result<R, ServiceError> + Send + Sync,
    A: DeserializeOwned,
    R: Serialize,
{
    Unary {
        handler,
        _signature: PhantomData,
    }
}

/// Wraps a handler taking two JSON-decoded arguments.
pub const fn binary<F, A, B, R>(handler: F) -> Binary<F, A, B, R>
where
    F: Fn(&mut CallContext<'_>, A, B) -> Result<R, ServiceError> + Send + Sync,
    A: DeserializeOwned,
    B: DeserializeOwned,
    R: Serialize,
{
    Binary {
        handler,
        _signature: PhantomData,
    }
}

impl<F, R> ServiceMethod for Nullary<F, R>
where
    F: Fn(&mut CallContext<'_>) -> Result<R, ServiceError> + Send + Sync,
    R: Serialize,
{
    fn invoke(
        &self,
        context: &mut CallContext<'_>,
        arguments: Vec<Value>,
    ) -> Result<Value, ServiceError> {
        let [] = expect_arguments::<0>(arguments)?;
        encode_result(&(self.handler)(context)?)
    }
}

impl<F, A, R> ServiceMethod for Unary<F, A, R>
where
    F: Fn(&mut CallContext<'_>, A) -> Result<R, ServiceError> + Send + Sync,
    A: DeserializeOwned,
    R: Serialize,
{
    fn invoke(
        &self,
        context: &mut CallContext<'_>,
        arguments: Vec<Value>,
    ) -> Result<Value, ServiceError> {
        let [first] = expect_arguments::<1>(arguments)?;
        let first = decode_argument(first, 0)?;
        encode_result(&(self.handler)(context, first)?)
    }
}

impl<F, A, B, R> ServiceMethod for Binary<F, A, B, R>
where
    F: Fn(&mut CallContext<'_>, A, B) -> Result<R, ServiceError> + Send + Sync,
    A: DeserializeOwned,
    B: DeserializeOwned,
    R: Serialize,
{
    fn invoke(
        &self,
        context: &mut CallContext<'_>,
        arguments: Vec<Value>,
    ) -> Result<Value, ServiceError> {
        let [first, second] = expect_arguments::<2>(arguments)?;
        let first = decode_argument(first, 0)?;
        let second = decode_argument(second, 1)?;
        encode_result(&(self.handler)(context, first, second)?)
    }
}

fn expect_arguments<const N: usize>(arguments: Vec<Value>) -> Result<[Value; N], ServiceError> {
    let received = arguments.len();
    <[Value; N]>::try_from(arguments).map_err(|_| {
        ServiceError::Arguments(format!("expected {N} argument(s), received {received}"))
    })
}

fn decode_argument<T: DeserializeOwned>(value: Value, position: usize) -> Result<T, ServiceError> {
    serde_json::from_value(value)
        .map_err(|error| ServiceError::Arguments(format!("argument {position}: {error}")))
}

fn encode_result<R: Serialize>(result: &R) -> Result<Value, ServiceError> {
    serde_json::to_value(result).map_err(ServiceError::failed)
}

/// A method registered on a [`Service`].
pub struct RegisteredMethod {
    name: String,
    parameter_types: Vec<String>,
    handler: Box<dyn ServiceMethod>,
}

impl RegisteredMethod {
    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter types.
    #[must_use]
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    /// Declared parameter count.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }

    pub(crate) fn invoke(
        &self,
        context: &mut CallContext<'_>,
        arguments: Vec<Value>,
    ) -> Result<Value, ServiceError> {
        self.handler.invoke(context, arguments)
    }
}

impl fmt::Debug for RegisteredMethod {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RegisteredMethod")
            .field("name", &self.name)
            .field("parameter_types", &self.parameter_types)
            .finish_non_exhaustive()
    }
}

/// Methods exposed under one class name.
#[derive(Debug)]
pub struct Service {
    class_name: String,
    methods: Vec<RegisteredMethod>,
}

impl Service {
    /// Starts a service with no methods.
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            methods: Vec::new(),
        }
    }

    /// Registers a method. Methods are matched in registration order.
    #[must_use]
    pub fn method(
        mut self,
        name: impl Into<String>,
        parameter_types: &[&str],
        handler: impl ServiceMethod + 'static,
    ) -> Self {
        self.methods.push(RegisteredMethod {
            name: name.into(),
            parameter_types: parameter_types.iter().map(|ty| (*ty).to_owned()).collect(),
            handler: Box::new(handler),
        });
        self
    }

    /// Fully qualified class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Segment of the class name after the last `.`.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.class_name
            .rsplit_once('.')
            .map_or(self.class_name.as_str(), |(_, simple)| simple)
    }

    /// Method with the given name and exact parameter types.
    #[must_use]
    pub fn find_exact(&self, name: &str, parameter_types: &[String]) -> Option<&RegisteredMethod> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.parameter_types == parameter_types)
    }

    /// First method registered under `name`.
    #[must_use]
    pub fn find_first(&self, name: &str) -> Option<&RegisteredMethod> {
        self.methods.iter().find(|method| method.name == name)
    }
}

/// Services known to the dispatcher, indexed by full and simple class name.
///
/// Built before the server starts and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    by_class: HashMap<String, Arc<Service>>,
    by_simple: HashMap<String, Arc<Service>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service, returning any service it replaced.
    ///
    /// When two services share a simple name the first one registered keeps
    /// the simple-name route.
    pub fn register(&mut self, service: Service) -> Option<Arc<Service>> {
        let service = Arc::new(service);
        if let Entry::Vacant(slot) = self.by_simple.entry(service.simple_name().to_owned()) {
            slot.insert(Arc::clone(&service));
        }
        self.by_class
            .insert(service.class_name().to_owned(), service)
    }

    /// Service registered under the fully qualified `class_name`.
    #[must_use]
    pub fn find(&self, class_name: &str) -> Option<&Service> {
        self.by_class.get(class_name).map(Arc::as_ref)
    }

    /// Service whose simple name is `simple_name`.
    #[must_use]
    pub fn find_simple(&self, simple_name: &str) -> Option<&Service> {
        self.by_simple.get(simple_name).map(Arc::as_ref)
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_class.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }
}
