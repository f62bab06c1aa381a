//! Loopback server used by the client integration tests.
//!
//! Methods understood by the fake:
//! - `echo(value, delay_ms?)` answers with `value` after an optional delay,
//!   from its own thread so replies can overtake each other;
//! - `silent` never answers;
//! - `hangup` closes the connection;
//! - `fail` answers with an invocation failure.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use courier_config::ServerEndpoint;
use courier_protocol::{Failure, FrameReader, Request, Response, codec};
use serde_json::Value;

/// Fake courier server bound to an ephemeral loopback port.
pub struct FakeServer {
    address: SocketAddr,
    pings: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeServer {
    /// Binds and starts accepting.
    pub fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind fake server");
        listener
            .set_nonblocking(true)
            .expect("non-blocking listener");
        let address = listener.local_addr().expect("fake server address");
        let pings = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let pings = Arc::clone(&pings);
            let accepted = Arc::clone(&accepted);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || accept_loop(&listener, &pings, &accepted, &shutdown))
        };

        Self {
            address,
            pings,
            accepted,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Endpoint clients should dial.
    pub fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint::tcp("127.0.0.1", self.address.port())
    }

    /// PING requests received across all connections.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: &TcpListener,
    pings: &Arc<AtomicUsize>,
    accepted: &AtomicUsize,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).expect("blocking stream");
                accepted.fetch_add(1, Ordering::SeqCst);
                let pings = Arc::clone(pings);
                thread::spawn(move || serve(stream, &pings));
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return,
        }
    }
}

fn serve(stream: TcpStream, pings: &AtomicUsize) {
    let writer = Arc::new(Mutex::new(stream.try_clone().expect("clone stream")));
    let mut frames = FrameReader::new(stream);
    while let Ok(Some(frame)) = frames.read_frame() {
        let Ok(request) = codec::decode::<Request>(&frame) else {
            return;
        };
        if request.is_ping() {
            pings.fetch_add(1, Ordering::SeqCst);
            reply(&writer, &Response::heartbeat_ack(&request));
            continue;
        }
        match request.method_name() {
            "echo" => {
                let value = request.parameters().first().cloned().unwrap_or(Value::Null);
                let delay = request
                    .parameters()
                    .get(1)
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(delay));
                    reply(&writer, &Response::for_request(&request).with_result(value));
                });
            }
            "silent" => {}
            "hangup" => {
                let _ = writer.lock().expect("writer lock").shutdown(Shutdown::Both);
                return;
            }
            "fail" => reply(
                &writer,
                &Response::for_request(&request).with_failure(Failure::invocation("boom")),
            ),
            other => reply(
                &writer,
                &Response::for_request(&request)
                    .with_failure(Failure::method_not_found(request.class_name(), other)),
            ),
        }
    }
}

fn reply(writer: &Mutex<TcpStream>, response: &Response) {
    let mut stream = writer.lock().expect("writer lock");
    let _ = codec::write_frame(&mut *stream, response);
}

/// Polls `condition` until it holds or two seconds pass.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
