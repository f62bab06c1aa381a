//! Correlation and connection lifecycle against a loopback server.

mod support;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use courier_client::{
    CallError, Client, ClientError, ConnectionManager, ConnectionSettings, StaticAddress,
};
use courier_config::ReconnectPolicy;
use courier_protocol::{ChainContext, FailureKind, Request};
use rstest::{fixture, rstest};
use serde_json::json;

use support::{FakeServer, eventually};

const CLIENT_ID: &str = "orders";

#[fixture]
fn server() -> FakeServer {
    FakeServer::start()
}

fn quiet_settings() -> ConnectionSettings {
    ConnectionSettings::default().with_heartbeat_interval(Duration::ZERO)
}

fn manager_for(server: &FakeServer, settings: ConnectionSettings, policy: ReconnectPolicy) -> ConnectionManager {
    ConnectionManager::new(settings, policy, Arc::new(StaticAddress::new(server.endpoint())))
}

fn client_for(server: &FakeServer) -> Client {
    Client::with_manager(
        CLIENT_ID,
        manager_for(server, quiet_settings(), ReconnectPolicy::lazy()),
        Duration::from_secs(2),
    )
}

fn echo(client: &Client, value: u64, delay_ms: u64) -> Request {
    client
        .rpc_request("Echo", "echo")
        .with_parameter("long", json!(value))
        .with_parameter("long", json!(delay_ms))
}

#[rstest]
fn concurrent_callers_receive_their_own_responses(server: FakeServer) {
    let client = Arc::new(client_for(&server));
    let callers: Vec<_> = (0..16_u64)
        .map(|index| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                // Later callers get faster replies, so responses arrive out of order.
                let request = echo(&client, index, (16 - index) * 5);
                let value = client.invoke(&request).expect("echo result");
                (index, value)
            })
        })
        .collect();

    for caller in callers {
        let (index, value) = caller.join().expect("caller thread");
        assert_eq!(value, json!(index));
    }
    assert_eq!(server.accepted(), 1, "callers should share one connection");
}

#[rstest]
fn timeout_leaves_connection_usable(server: FakeServer) {
    let client = client_for(&server);
    let connection = client.connection().expect("connect");

    let silent = client.rpc_request("Echo", "silent");
    let error = client
        .call_with_timeout(&silent, Duration::from_millis(50))
        .expect_err("silent call times out");
    let call_error = error.as_call_error().expect("call error");
    assert!(matches!(call_error, CallError::Timeout { .. }));
    assert_eq!(call_error.failure_kind(), Some(FailureKind::Timeout));

    assert!(connection.is_open());
    assert_eq!(connection.pending_calls(), 0);
    let value = client.invoke(&echo(&client, 7, 0)).expect("follow-up call");
    assert_eq!(value, json!(7));
    assert_eq!(client.connection().expect("same connection").id(), connection.id());
}

#[rstest]
fn reader_idle_fails_pending_calls_without_closing(server: FakeServer) {
    let settings = quiet_settings().with_read_timeout(Some(Duration::from_millis(150)));
    let client = Client::with_manager(
        CLIENT_ID,
        manager_for(&server, settings, ReconnectPolicy::lazy()),
        Duration::from_secs(5),
    );

    let started = Instant::now();
    let error = client
        .call(&client.rpc_request("Echo", "silent"))
        .expect_err("reader idle");
    assert!(matches!(
        error.as_call_error(),
        Some(CallError::ReaderIdle { .. })
    ));
    assert!(started.elapsed() < Duration::from_secs(4));

    let connection = client.connection().expect("connection");
    assert!(connection.is_open());
    assert!(connection.stats().reader_idle_events >= 1);
    assert_eq!(client.invoke(&echo(&client, 3, 0)).expect("echo"), json!(3));
}

#[rstest]
fn remote_failures_surface_as_call_errors(server: FakeServer) {
    let client = client_for(&server);

    let response = client
        .call(&client.rpc_request("Echo", "fail"))
        .expect("error response");
    assert!(response.is_error());

    let error = client
        .invoke(&client.rpc_request("Echo", "fail"))
        .expect_err("remote failure");
    assert_eq!(
        error.as_call_error().and_then(CallError::failure_kind),
        Some(FailureKind::InvocationFailure)
    );
}

#[rstest]
fn duplicate_live_ids_are_rejected(server: FakeServer) {
    let client = client_for(&server);
    let request = Request::rpc(CLIENT_ID, "fixed", "Echo", "silent");
    let _pending = client.send_async(&request).expect("first registration");

    let error = client.send_async(&request).expect_err("duplicate id");
    assert!(matches!(
        error,
        ClientError::Call(CallError::DuplicateRequestId { .. })
    ));
}

#[rstest]
fn nested_calls_carry_the_chain(server: FakeServer) {
    let client = client_for(&server);
    let mut chain = ChainContext::root("chain-42");

    let first = client
        .call_in_chain(&mut chain, echo(&client, 1, 0))
        .expect("first hop");
    let second = client
        .call_in_chain(&mut chain, echo(&client, 2, 0))
        .expect("second hop");

    assert_eq!(first.chain_id(), Some("chain-42"));
    assert_eq!(second.chain_id(), Some("chain-42"));
    assert!(second.chain_order() > first.chain_order());
}

#[rstest]
fn lazy_policy_redials_on_next_use(server: FakeServer) {
    let manager = manager_for(&server, quiet_settings(), ReconnectPolicy::lazy());
    let first = manager.get_or_create(CLIENT_ID).expect("connect");
    first
        .send(&Request::rpc(CLIENT_ID, "bye", "Echo", "hangup"))
        .expect("send hangup");

    assert!(eventually(|| !first.is_open()), "connection should close");
    assert!(eventually(|| manager.get(CLIENT_ID).is_none()));

    let second = manager.get_or_create(CLIENT_ID).expect("reconnect");
    assert_ne!(second.id(), first.id());
    assert!(second.is_open());
    manager.close_all();
}

#[rstest]
fn eager_policy_redials_in_background(server: FakeServer) {
    let policy = ReconnectPolicy::eager(5, Duration::from_millis(20));
    let manager = manager_for(&server, quiet_settings(), policy);
    let first = manager.get_or_create(CLIENT_ID).expect("connect");
    first
        .send(&Request::rpc(CLIENT_ID, "bye", "Echo", "hangup"))
        .expect("send hangup");

    assert!(
        eventually(|| manager
            .get(CLIENT_ID)
            .is_some_and(|connection| connection.id() != first.id() && connection.is_open())),
        "eager policy should replace the closed connection"
    );
    assert!(server.accepted() >= 2);
    manager.close_all();
}

#[rstest]
fn explicit_close_does_not_redial(server: FakeServer) {
    let policy = ReconnectPolicy::eager(5, Duration::from_millis(10));
    let manager = manager_for(&server, quiet_settings(), policy);
    let connection = manager.get_or_create(CLIENT_ID).expect("connect");

    connection.close();
    assert!(!connection.is_open());
    assert!(manager.get(CLIENT_ID).is_none());
    thread::sleep(Duration::from_millis(100));
    assert!(manager.get(CLIENT_ID).is_none());
    assert!(matches!(
        connection.send(&Request::rpc(CLIENT_ID, "late", "Echo", "echo")),
        Err(CallError::ConnectionClosed)
    ));
}

#[rstest]
fn dropping_one_client_keeps_a_shared_manager_open(server: FakeServer) {
    let manager = manager_for(&server, quiet_settings(), ReconnectPolicy::lazy());
    let first = Client::with_manager(CLIENT_ID, manager.clone(), Duration::from_secs(2));
    let second = Client::with_manager(CLIENT_ID, manager.clone(), Duration::from_secs(2));
    drop(manager);

    let connection = first.connection().expect("connect");
    drop(first);
    assert!(connection.is_open(), "a remaining client still shares the connection");
    assert_eq!(second.invoke(&echo(&second, 7, 0)).expect("echo"), json!(7));

    drop(second);
    assert!(!connection.is_open(), "the last client closes the connection");
}
