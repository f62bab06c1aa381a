//! Per-connection request loop.
//!
//! The connection thread reads frames and hands each decoded request to the
//! worker pool. Responses travel back over a channel to a dedicated writer
//! thread, so they are written in completion order rather than arrival
//! order. A malformed frame or a transport error closes the connection; a
//! request the dispatcher cannot serve never does.

use std::collections::HashSet;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use courier_protocol::codec::{self, CodecError};
use courier_protocol::{FrameReader, Request, Response};
use crossbeam::channel::{self, Receiver, Sender};
use tracing::{Span, debug, info, warn};

use super::DISPATCH_TARGET;
use super::dispatcher::Dispatcher;
use super::errors::DispatchFailure;
use super::pool::WorkerPool;
use crate::connections::ServerConnectionRegistry;
use crate::telemetry;
use crate::transport::ConnectionHandler;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Serves courier connections accepted by the listener.
#[derive(Debug)]
pub(crate) struct DispatchConnectionHandler {
    dispatcher: Dispatcher,
    pool: Arc<WorkerPool>,
    connections: Arc<ServerConnectionRegistry>,
}

impl DispatchConnectionHandler {
    pub(crate) const fn new(
        dispatcher: Dispatcher,
        pool: Arc<WorkerPool>,
        connections: Arc<ServerConnectionRegistry>,
    ) -> Self {
        Self {
            dispatcher,
            pool,
            connections,
        }
    }

    fn submit(&self, connection_id: u64, request: Request, outbound: &Sender<Response>) {
        let dispatcher = self.dispatcher.clone();
        let replies = outbound.clone();
        let fallback = Response::for_request(&request);
        let span = Span::current();
        let queued = self.pool.execute(move |chain| {
            let response = span.in_scope(|| dispatcher.dispatch(request, chain));
            if let Err(undelivered) = replies.send(response) {
                report_undelivered(connection_id, &undelivered.0);
            }
        });
        if queued.is_err() {
            let rejected = fallback.with_failure(DispatchFailure::ShuttingDown.into_failure());
            if let Err(undelivered) = outbound.send(rejected) {
                report_undelivered(connection_id, &undelivered.0);
            }
        }
    }
}

impl ConnectionHandler for DispatchConnectionHandler {
    fn handle(&self, stream: TcpStream) {
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let peer = stream.peer_addr().ok();
        let span = telemetry::connection_span(connection_id, peer);
        let _entered = span.enter();
        let write_half = match stream.try_clone() {
            Ok(write_half) => write_half,
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    connection_id,
                    error = %error,
                    "failed to clone connection stream"
                );
                return;
            }
        };

        let (outbound, inbound) = channel::unbounded::<Response>();
        let writer_span = span.clone();
        let writer = thread::Builder::new()
            .name(format!("courierd-writer-{connection_id}"))
            .spawn(move || {
                writer_span.in_scope(|| write_responses(connection_id, write_half, &inbound));
            });
        if let Err(error) = writer {
            warn!(
                target: DISPATCH_TARGET,
                connection_id,
                error = %error,
                "failed to spawn writer thread"
            );
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }

        info!(
            target: DISPATCH_TARGET,
            connection_id,
            peer = ?peer,
            "connection opened"
        );
        let identities = self.read_requests(connection_id, peer, stream, &outbound);
        for client_id in &identities {
            self.connections.release(client_id, connection_id);
        }
        info!(
            target: DISPATCH_TARGET,
            connection_id,
            peer = ?peer,
            "connection closed"
        );
    }
}

impl DispatchConnectionHandler {
    /// Reads until the peer hangs up or the stream fails, returning every
    /// client identity the connection registered under.
    fn read_requests(
        &self,
        connection_id: u64,
        peer: Option<SocketAddr>,
        stream: TcpStream,
        outbound: &Sender<Response>,
    ) -> HashSet<String> {
        let mut identities = HashSet::new();
        let mut frames = FrameReader::new(stream);
        loop {
            let frame = match frames.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(error) if error.is_timeout() => continue,
                Err(error) => {
                    warn!(
                        target: DISPATCH_TARGET,
                        connection_id,
                        peer = ?peer,
                        error = %error,
                        "connection read failed"
                    );
                    break;
                }
            };
            let request = match codec::decode::<Request>(&frame) {
                Ok(request) => request,
                Err(error) => {
                    report_malformed(connection_id, &error);
                    break;
                }
            };
            if !identities.contains(request.client_id())
                && self
                    .connections
                    .bind(request.client_id(), connection_id, outbound)
            {
                identities.insert(request.client_id().to_owned());
            }
            self.submit(connection_id, request, outbound);
        }
        let _ = frames.get_ref().shutdown(Shutdown::Read);
        identities
    }
}

fn report_malformed(connection_id: u64, error: &CodecError) {
    warn!(
        target: DISPATCH_TARGET,
        connection_id,
        error = %error,
        "malformed request frame; closing connection"
    );
}

fn report_undelivered(connection_id: u64, response: &Response) {
    debug!(
        target: DISPATCH_TARGET,
        connection_id,
        request_id = response.request_id(),
        "connection closed before the response could be queued"
    );
}

fn write_responses(connection_id: u64, mut stream: TcpStream, responses: &Receiver<Response>) {
    for response in responses {
        if let Err(error) = codec::write_frame(&mut stream, &response) {
            debug!(
                target: DISPATCH_TARGET,
                connection_id,
                error = %error,
                "response write failed"
            );
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}
