//! Write-idle heartbeat.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use courier_protocol::Request;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, trace};

use super::Connection;
use crate::CONNECTION_TARGET;

/// Sends one PING each time the connection has been write-idle for
/// `interval`. Exits when the stop channel disconnects.
pub(super) fn run(connection: &Connection, stop: &Receiver<()>, interval: Duration) {
    loop {
        let deadline = connection.last_write() + interval;
        let now = Instant::now();
        if deadline <= now {
            if let Err(error) = connection.send(&Request::ping(connection.client_id())) {
                debug!(
                    target: CONNECTION_TARGET,
                    connection_id = connection.id,
                    error = %error,
                    "heartbeat stopped"
                );
                return;
            }
            connection
                .counters
                .heartbeats_sent
                .fetch_add(1, Ordering::Relaxed);
            trace!(
                target: CONNECTION_TARGET,
                connection_id = connection.id,
                "heartbeat sent"
            );
            continue;
        }

        match stop.recv_timeout(deadline - now) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
