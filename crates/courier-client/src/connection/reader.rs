//! Inbound half of a connection.

use std::net::TcpStream;
use std::sync::atomic::Ordering;

use courier_protocol::{FrameReader, Response, codec};
use tracing::{debug, trace, warn};

use super::{CloseReason, Connection};
use crate::CONNECTION_TARGET;
use crate::errors::CallError;

pub(super) fn run(connection: &Connection, stream: TcpStream) {
    let mut frames = FrameReader::new(stream);
    while connection.is_open() {
        match frames.read_frame() {
            Ok(Some(frame)) => match codec::decode::<Response>(&frame) {
                Ok(response) => publish(connection, response),
                Err(error) => {
                    warn!(
                        target: CONNECTION_TARGET,
                        connection_id = connection.id,
                        error = %error,
                        "undecodable response frame"
                    );
                    connection.teardown(CloseReason::Failed);
                }
            },
            Ok(None) => connection.teardown(CloseReason::PeerClosed),
            Err(error) if error.is_timeout() => reader_idle(connection),
            Err(error) => {
                if connection.is_open() {
                    warn!(
                        target: CONNECTION_TARGET,
                        connection_id = connection.id,
                        error = %error,
                        "connection read failed"
                    );
                }
                connection.teardown(CloseReason::Failed);
            }
        }
    }
}

fn publish(connection: &Connection, response: Response) {
    if response.is_heartbeat() {
        connection
            .counters
            .heartbeat_acks
            .fetch_add(1, Ordering::Relaxed);
        trace!(
            target: CONNECTION_TARGET,
            connection_id = connection.id,
            "heartbeat acknowledged"
        );
        return;
    }
    connection.pending.complete(response);
}

fn reader_idle(connection: &Connection) {
    connection
        .counters
        .reader_idle_events
        .fetch_add(1, Ordering::Relaxed);
    let failed = connection.pending.fail_all(|request_id| CallError::ReaderIdle {
        request_id: request_id.to_owned(),
    });
    debug!(
        target: CONNECTION_TARGET,
        connection_id = connection.id,
        failed,
        "reader idle"
    );
}
