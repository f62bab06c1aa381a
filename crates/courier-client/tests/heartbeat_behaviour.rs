//! Behavioural coverage for the write-idle heartbeat.

mod support;

use std::cell::RefCell;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use courier_client::{
    CallError, Connection, ConnectionManager, ConnectionSettings, StaticAddress,
};
use courier_config::ReconnectPolicy;
use courier_protocol::Request;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use support::{FakeServer, eventually};

const CLIENT_ID: &str = "heartbeat-client";

#[derive(Default)]
struct HeartbeatWorld {
    server: Option<FakeServer>,
    manager: Option<ConnectionManager>,
    connection: Option<Arc<Connection>>,
    call_error: Option<CallError>,
}

impl HeartbeatWorld {
    fn server(&self) -> &FakeServer {
        self.server.as_ref().expect("server started")
    }

    fn connection(&self) -> Arc<Connection> {
        Arc::clone(self.connection.as_ref().expect("connection opened"))
    }
}

impl Drop for HeartbeatWorld {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.close_all();
        }
    }
}

#[fixture]
fn world() -> RefCell<HeartbeatWorld> {
    RefCell::new(HeartbeatWorld::default())
}

#[given("a courier server on the loopback interface")]
fn given_server(world: &RefCell<HeartbeatWorld>) {
    world.borrow_mut().server = Some(FakeServer::start());
}

#[given("a client connection with a heartbeat interval of {millis} milliseconds")]
fn given_connection(world: &RefCell<HeartbeatWorld>, millis: u64) {
    let mut state = world.borrow_mut();
    let settings =
        ConnectionSettings::default().with_heartbeat_interval(Duration::from_millis(millis));
    let manager = ConnectionManager::new(
        settings,
        ReconnectPolicy::lazy(),
        Arc::new(StaticAddress::new(state.server().endpoint())),
    );
    let connection = manager.get_or_create(CLIENT_ID).expect("connect");
    state.manager = Some(manager);
    state.connection = Some(connection);
}

#[when("the connection stays idle for {millis} milliseconds")]
fn when_idle(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

#[when("a call the server never answers waits {millis} milliseconds")]
fn when_unanswered_call(world: &RefCell<HeartbeatWorld>, millis: u64) {
    let connection = world.borrow().connection();
    let request = Request::rpc(CLIENT_ID, "never", "Echo", "silent");
    let pending = connection.call(&request).expect("send call");
    let error = pending
        .wait(Duration::from_millis(millis))
        .expect_err("the server never answers");
    world.borrow_mut().call_error = Some(error);
}

#[when("the client sends a request every {every} milliseconds for {total} milliseconds")]
fn when_steady_traffic(world: &RefCell<HeartbeatWorld>, every: u64, total: u64) {
    let connection = world.borrow().connection();
    let deadline = Instant::now() + Duration::from_millis(total);
    let mut sequence = 0_u64;
    while Instant::now() < deadline {
        sequence += 1;
        let request = Request::rpc(CLIENT_ID, format!("t{sequence}"), "Echo", "silent");
        connection.send(&request).expect("send traffic");
        thread::sleep(Duration::from_millis(every));
    }
}

#[then("the server received between {low} and {high} heartbeats")]
fn then_heartbeat_range(world: &RefCell<HeartbeatWorld>, low: usize, high: usize) {
    let pings = world.borrow().server().pings();
    assert!(
        (low..=high).contains(&pings),
        "expected {low}..={high} heartbeats, got {pings}"
    );
}

#[then("every heartbeat was acknowledged without completing a call")]
fn then_acknowledged(world: &RefCell<HeartbeatWorld>) {
    let connection = world.borrow().connection();
    assert!(
        eventually(|| {
            let stats = connection.stats();
            stats.heartbeats_sent > 0 && stats.heartbeat_acks == stats.heartbeats_sent
        }),
        "acknowledgements lagged: {:?}",
        connection.stats()
    );
    assert_eq!(connection.pending_calls(), 0);
}

#[then("the call fails with a timeout")]
fn then_call_timed_out(world: &RefCell<HeartbeatWorld>) {
    let state = world.borrow();
    let error = state.call_error.as_ref().expect("call attempted");
    assert!(
        matches!(error, CallError::Timeout { .. }),
        "expected timeout, got {error:?}"
    );
    assert!(state.connection().stats().heartbeat_acks > 0);
}

#[then("the connection remains open")]
fn then_connection_open(world: &RefCell<HeartbeatWorld>) {
    let connection = world.borrow().connection();
    assert!(connection.is_open());
    assert_eq!(connection.pending_calls(), 0);
}

#[then("the server received no heartbeats")]
fn then_no_heartbeats(world: &RefCell<HeartbeatWorld>) {
    assert_eq!(world.borrow().server().pings(), 0);
    assert_eq!(world.borrow().connection().stats().heartbeats_sent, 0);
}

#[scenario(
    path = "tests/features/heartbeat.feature",
    name = "An idle connection sends one heartbeat per interval"
)]
fn idle_connection_heartbeats(#[from(world)] world: RefCell<HeartbeatWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/heartbeat.feature",
    name = "Heartbeat replies never satisfy a pending call"
)]
fn heartbeat_replies_are_not_responses(#[from(world)] world: RefCell<HeartbeatWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/heartbeat.feature",
    name = "Steady traffic suppresses heartbeats"
)]
fn traffic_suppresses_heartbeats(#[from(world)] world: RefCell<HeartbeatWorld>) {
    drop(world);
}
