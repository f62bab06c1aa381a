//! Services and clients used across the server suites.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use courier_client::{Client, ConnectionManager, ConnectionSettings, StaticAddress};
use courier_config::{ReconnectPolicy, ServerEndpoint};
use serde_json::json;

use crate::dispatch::{Service, ServiceError, ServiceRegistry, nullary, unary};
use crate::echo_service;

/// Class name of the test service.
pub const FOO_SERVICE: &str = "com.example.Foo";

/// Registry holding `com.example.Foo` and the built-in echo service.
///
/// `bar(int)` doubles its argument, `fail()` raises a wrapped error,
/// `explode()` panics and `chain()` reports the chain it observes.
pub fn foo_services() -> ServiceRegistry {
    let mut services = ServiceRegistry::new();
    services.register(
        Service::new(FOO_SERVICE)
            .method("bar", &["int"], unary(|_context, value: i64| Ok(value * 2)))
            .method(
                "fail",
                &[],
                nullary(|_context| -> Result<(), ServiceError> {
                    Err(ServiceError::failed(io::Error::other("ledger unavailable")))
                }),
            )
            .method(
                "explode",
                &[],
                nullary(|_context| -> Result<(), ServiceError> { panic!("service exploded") }),
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
    services.register(echo_service());
    services
}

/// Client dialling `addr` without heartbeats.
pub fn client_for(client_id: &str, addr: SocketAddr) -> Client {
    let endpoint = ServerEndpoint::tcp(addr.ip().to_string(), addr.port());
    let manager = ConnectionManager::new(
        ConnectionSettings::default().with_heartbeat_interval(Duration::ZERO),
        ReconnectPolicy::lazy(),
        Arc::new(StaticAddress::new(endpoint)),
    );
    Client::with_manager(client_id, manager, Duration::from_secs(5))
}
