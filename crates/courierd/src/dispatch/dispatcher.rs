//! Request routing and execution.
//!
//! Each request moves through classification (by kind), resolution (service
//! and method lookup), execution (inside a chain scope, with panics caught)
//! and completion, which always yields exactly one [`Response`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use courier_protocol::{ChainContext, Failure, Request, RequestKind, Response};
use serde_json::Value;
use tracing::{debug, info, trace};

use super::DISPATCH_TARGET;
use super::errors::DispatchFailure;
use super::pool::panic_message;
use super::service::{CallContext, RegisteredMethod, ServiceError, ServiceRegistry};

/// Routes requests to registered services.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    services: Arc<ServiceRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher over a fixed set of services.
    #[must_use]
    pub const fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }

    /// Services this dispatcher routes to.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Produces the response for `request`.
    ///
    /// `chain` is the worker's chain context. It is established from the
    /// request for the duration of the call and is clear again on return,
    /// whether the service succeeded, failed or panicked.
    pub fn dispatch(&self, request: Request, chain: &mut ChainContext) -> Response {
        if request.is_ping() {
            trace!(
                target: DISPATCH_TARGET,
                client_id = request.client_id(),
                "heartbeat received"
            );
            return Response::heartbeat_ack(&request);
        }

        let started = Instant::now();
        info!(
            target: DISPATCH_TARGET,
            request_id = request.request_id(),
            client_id = request.client_id(),
            kind = %request.kind(),
            class_name = request.class_name(),
            method_name = request.method_name(),
            chain_id = request.chain_id().unwrap_or_default(),
            chain_order = request.chain_order(),
            "request received"
        );

        let response = match request.kind().clone() {
            RequestKind::Rpc => self.invoke_rpc(request, chain),
            RequestKind::Api => self.invoke_api(request, chain),
            RequestKind::Ping => Response::heartbeat_ack(&request),
            RequestKind::Unsupported(kind) => {
                respond(&request, Err(DispatchFailure::UnsupportedKind { kind }))
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match response.failure() {
            None => info!(
                target: DISPATCH_TARGET,
                request_id = response.request_id(),
                elapsed_ms,
                "request completed"
            ),
            Some(failure) => info!(
                target: DISPATCH_TARGET,
                request_id = response.request_id(),
                elapsed_ms,
                failure_kind = failure.kind().as_str(),
                failure = failure.message(),
                "request failed"
            ),
        }
        response
    }

    fn invoke_rpc(&self, mut request: Request, chain: &mut ChainContext) -> Response {
        let outcome = self.resolve_rpc(&request).and_then(|method| {
            if request.parameters().len() != method.arity() {
                return Err(DispatchFailure::Usage {
                    message: format!(
                        "{} declares {} parameter(s) but {} argument(s) were sent",
                        method.name(),
                        method.arity(),
                        request.parameters().len()
                    ),
                });
            }
            let arguments = request.take_parameters();
            execute(&request, method, arguments, chain)
        });
        respond(&request, outcome)
    }

    fn invoke_api(&self, mut request: Request, chain: &mut ChainContext) -> Response {
        let received = request.parameters().len();
        if received > 1 {
            let message = format!("API calls take at most one argument; {received} were sent");
            return usage_error(&request, echo_of(&request), message);
        }

        let method = match self.resolve_api(&request) {
            Ok(method) => method,
            Err(failure) => return respond(&request, Err(failure)),
        };
        if method.arity() > 1 {
            let message = format!(
                "API calls take at most one argument; {} declares {}",
                method.name(),
                method.arity()
            );
            return usage_error(&request, echo_of(&request), message);
        }

        let echo = echo_of(&request);
        let mut arguments = request.take_parameters();
        if method.arity() == 0 {
            arguments.clear();
        }
        match execute(&request, method, arguments, chain) {
            Err(DispatchFailure::Usage { message }) => usage_error(&request, echo, message),
            outcome => respond(&request, outcome),
        }
    }

    fn resolve_rpc(&self, request: &Request) -> Result<&RegisteredMethod, DispatchFailure> {
        let service =
            self.services
                .find(request.class_name())
                .ok_or_else(|| DispatchFailure::TargetNotFound {
                    class_name: request.class_name().to_owned(),
                })?;
        service
            .find_exact(request.method_name(), request.parameter_types())
            .ok_or_else(|| DispatchFailure::MethodNotFound {
                class_name: service.class_name().to_owned(),
                method_name: request.method_name().to_owned(),
            })
    }

    fn resolve_api(&self, request: &Request) -> Result<&RegisteredMethod, DispatchFailure> {
        let simple_name = request.simple_class_name();
        let service =
            self.services
                .find_simple(simple_name)
                .ok_or_else(|| DispatchFailure::TargetNotFound {
                    class_name: request.class_name().to_owned(),
                })?;
        service
            .find_first(request.method_name())
            .ok_or_else(|| DispatchFailure::MethodNotFound {
                class_name: service.class_name().to_owned(),
                method_name: request.method_name().to_owned(),
            })
    }
}

fn execute(
    request: &Request,
    method: &RegisteredMethod,
    arguments: Vec<Value>,
    chain: &mut ChainContext,
) -> Result<Value, DispatchFailure> {
    let mut scope = chain.scope();
    scope.establish(request);
    debug!(
        target: DISPATCH_TARGET,
        request_id = request.request_id(),
        method = method.name(),
        chain_order = scope.chain_order(),
        "executing"
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut context = CallContext::new(request, &mut scope);
        method.invoke(&mut context, arguments)
    }));

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(ServiceError::Arguments(message))) => Err(DispatchFailure::Usage { message }),
        Ok(Err(error)) => Err(DispatchFailure::Invocation {
            message: error.root_cause(),
        }),
        Err(payload) => Err(DispatchFailure::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn respond(request: &Request, outcome: Result<Value, DispatchFailure>) -> Response {
    let response = Response::for_request(request);
    match outcome {
        Ok(value) => response.with_result(value),
        Err(failure) => response.with_failure(failure.into_failure()),
    }
}

fn usage_error(request: &Request, echo: Value, message: String) -> Response {
    Response::for_request(request)
        .with_result(echo)
        .with_failure(Failure::usage(message))
}

fn echo_of(request: &Request) -> Value {
    serde_json::to_value(request).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use std::io;

    use courier_protocol::FailureKind;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::dispatch::{Service, binary, nullary, unary};

    #[fixture]
    fn dispatcher() -> Dispatcher {
        let mut services = ServiceRegistry::new();
        services.register(
            Service::new("com.example.Foo")
                .method("bar", &["int"], unary(|_context, value: i64| Ok(value * 2)))
                .method(
                    "sum",
                    &["int", "int"],
                    binary(|_context, left: i64, right: i64| Ok(left + right)),
                )
                .method(
                    "broken",
                    &[],
                    nullary(|_context| -> Result<(), ServiceError> {
                        Err(ServiceError::failed(io::Error::other("disk gone")))
                    }),
                )
                .method(
                    "explode",
                    &[],
                    nullary(|_context| -> Result<(), ServiceError> { panic!("kaboom") }),
                )
                .method(
                    "chain",
                    &[],
                    nullary(|context| {
                        Ok(json!({
                            "chain_id": context.chain().chain_id(),
                            "chain_order": context.chain().chain_order(),
                        }))
                    }),
                ),
        );
        Dispatcher::new(Arc::new(services))
    }

    fn run(dispatcher: &Dispatcher, request: Request) -> (Response, ChainContext) {
        let mut chain = ChainContext::new();
        let response = dispatcher.dispatch(request, &mut chain);
        (response, chain)
    }

    fn failure_kind(response: &Response) -> Option<FailureKind> {
        response.failure().map(Failure::kind)
    }

    #[rstest]
    fn rpc_returns_the_live_value(dispatcher: Dispatcher) {
        let request = Request::rpc("c", "r1", "com.example.Foo", "bar").with_parameter("int", json!(5));
        let (response, chain) = run(&dispatcher, request);
        assert!(!response.is_error(), "{response:?}");
        assert_eq!(response.result(), Some(&json!(10)));
        assert_eq!(response.request_id(), "r1");
        assert!(chain.is_clear());
    }

    #[rstest]
    fn ping_is_acknowledged_with_the_sentinel(dispatcher: Dispatcher) {
        let (response, _) = run(&dispatcher, Request::ping("c"));
        assert!(response.is_heartbeat());
        assert!(!response.is_error());
        assert_eq!(response.result(), Some(&json!(courier_protocol::PING_RESULT)));
    }

    #[rstest]
    #[case::unknown_class(
        Request::rpc("c", "r", "com.example.Missing", "bar"),
        FailureKind::TargetNotFound
    )]
    #[case::unknown_method(
        Request::rpc("c", "r", "com.example.Foo", "baz"),
        FailureKind::MethodNotFound
    )]
    #[case::wrong_types(
        Request::rpc("c", "r", "com.example.Foo", "bar").with_parameter("string", json!("5")),
        FailureKind::MethodNotFound
    )]
    #[case::undecodable(
        Request::rpc("c", "r", "com.example.Foo", "bar").with_parameter("int", json!("five")),
        FailureKind::UsageError
    )]
    #[case::raised(
        Request::rpc("c", "r", "com.example.Foo", "broken"),
        FailureKind::InvocationFailure
    )]
    #[case::panicked(
        Request::rpc("c", "r", "com.example.Foo", "explode"),
        FailureKind::InvocationFailure
    )]
    #[case::api_unknown_class(
        Request::api("c", "r", "Missing", "bar"),
        FailureKind::TargetNotFound
    )]
    #[case::api_unknown_method(
        Request::api("c", "r", "Foo", "baz"),
        FailureKind::MethodNotFound
    )]
    #[case::unsupported(
        Request::rpc("c", "r", "com.example.Foo", "bar")
            .with_kind(RequestKind::Unsupported("stream".into())),
        FailureKind::UnsupportedKind
    )]
    fn failures_become_error_responses(
        dispatcher: Dispatcher,
        #[case] request: Request,
        #[case] expected: FailureKind,
    ) {
        let (response, chain) = run(&dispatcher, request);
        assert!(response.is_error());
        assert_eq!(response.request_id(), "r");
        assert_eq!(failure_kind(&response), Some(expected));
        assert!(chain.is_clear());
    }

    #[rstest]
    fn failures_report_the_root_cause(dispatcher: Dispatcher) {
        let (response, _) = run(&dispatcher, Request::rpc("c", "r", "com.example.Foo", "broken"));
        let failure = response.failure().expect("failure");
        assert_eq!(failure.message(), "disk gone");

        let (response, _) = run(&dispatcher, Request::rpc("c", "r", "com.example.Foo", "explode"));
        let failure = response.failure().expect("failure");
        assert!(failure.message().contains("kaboom"), "{failure:?}");
    }

    #[rstest]
    fn api_resolves_by_simple_name(dispatcher: Dispatcher) {
        let request = Request::api("c", "r", "anything.Foo", "bar").with_argument(json!(21));
        let (response, _) = run(&dispatcher, request);
        assert_eq!(response.result(), Some(&json!(42)));
    }

    #[rstest]
    fn api_with_two_arguments_is_a_usage_error(dispatcher: Dispatcher) {
        let request = Request::api("c", "r", "Foo", "bar")
            .with_argument(json!(1))
            .with_argument(json!(2));
        let (response, _) = run(&dispatcher, request.clone());
        assert_eq!(failure_kind(&response), Some(FailureKind::UsageError));
        let echoed: Request =
            serde_json::from_value(response.result().cloned().expect("echoed request"))
                .expect("decode echo");
        assert_eq!(echoed, request);
    }

    #[rstest]
    #[case::unknown_method("Foo", "baz")]
    #[case::unknown_class("Missing", "bar")]
    fn api_argument_count_is_checked_before_lookup(
        dispatcher: Dispatcher,
        #[case] class_name: &str,
        #[case] method_name: &str,
    ) {
        let request = Request::api("c", "r", class_name, method_name)
            .with_argument(json!("p1"))
            .with_argument(json!("p2"));
        let (response, _) = run(&dispatcher, request.clone());
        assert_eq!(failure_kind(&response), Some(FailureKind::UsageError));
        let echoed: Request =
            serde_json::from_value(response.result().cloned().expect("echoed request"))
                .expect("decode echo");
        assert_eq!(echoed, request);
    }

    #[rstest]
    fn api_ignores_the_argument_of_a_parameterless_method(dispatcher: Dispatcher) {
        let request = Request::api("c", "r", "Foo", "chain").with_argument(json!({ "ignored": true }));
        let (response, _) = run(&dispatcher, request);
        assert!(!response.is_error(), "{response:?}");
        assert_eq!(
            response.result(),
            Some(&json!({ "chain_id": null, "chain_order": 0 }))
        );
    }

    #[rstest]
    fn api_rejects_methods_declaring_two_parameters(dispatcher: Dispatcher) {
        let request = Request::api("c", "r", "Foo", "sum").with_argument(json!(1));
        let (response, _) = run(&dispatcher, request);
        assert_eq!(failure_kind(&response), Some(FailureKind::UsageError));
        assert!(response.result().is_some());
    }

    #[rstest]
    fn rpc_failures_do_not_echo_the_request(dispatcher: Dispatcher) {
        let request = Request::rpc("c", "r", "com.example.Foo", "bar").with_parameter("int", json!("x"));
        let (response, _) = run(&dispatcher, request);
        assert!(response.is_error());
        assert!(response.result().is_none());
    }

    #[rstest]
    fn chain_metadata_is_echoed_and_visible_to_the_service(dispatcher: Dispatcher) {
        let request = Request::rpc("c", "r", "com.example.Foo", "chain")
            .with_chain("chain-9", 3)
            .with_service_name("orders");
        let (response, chain) = run(&dispatcher, request);
        assert_eq!(response.chain_id(), Some("chain-9"));
        assert_eq!(response.chain_order(), 3);
        assert_eq!(response.service_name(), Some("orders"));
        assert_eq!(
            response.result(),
            Some(&json!({ "chain_id": "chain-9", "chain_order": 3 }))
        );
        assert!(chain.is_clear());
    }

    #[rstest]
    fn panics_leave_no_chain_residue(dispatcher: Dispatcher) {
        let mut chain = ChainContext::new();
        let request = Request::rpc("c", "r", "com.example.Foo", "explode").with_chain("chain-p", 7);
        let response = dispatcher.dispatch(request, &mut chain);
        assert!(response.is_error());
        assert!(chain.is_clear());

        let follow_up = Request::rpc("c", "r2", "com.example.Foo", "chain");
        let response = dispatcher.dispatch(follow_up, &mut chain);
        assert_eq!(
            response.result(),
            Some(&json!({ "chain_id": null, "chain_order": 0 }))
        );
    }
}
