//! A persistent TCP connection to a courier server.
//!
//! Each connection owns two background threads. The reader decodes every
//! inbound frame and publishes it to the connection's
//! [`CorrelationRegistry`]; the heartbeat thread writes a PING whenever the
//! connection has been write-idle for the configured interval. Writes from
//! callers and the heartbeat are serialised by a mutex around the socket.
//!
//! A read timeout on the socket is the reader-idle signal: pending calls are
//! failed and the connection stays open. Any other read error, end of
//! stream, or undecodable frame tears the connection down.

mod heartbeat;
mod reader;

use std::fmt;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use courier_config::{Config, ServerEndpoint};
use courier_protocol::{Request, codec};
use crossbeam::channel::{self, Sender};
use tracing::{debug, info};

use crate::CONNECTION_TARGET;
use crate::errors::{CallError, ClientError};
use crate::pending::{CorrelationRegistry, PendingCall};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Socket and timer settings applied to each new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    heartbeat_interval: Duration,
    read_timeout: Option<Duration>,
    connect_timeout: Duration,
}

impl ConnectionSettings {
    /// Settings derived from the shared configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            read_timeout: config.read_timeout(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the write-idle period; zero disables heartbeats.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the reader-idle period; `None` disables it.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the dial timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Write-idle period.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Reader-idle period.
    #[must_use]
    pub const fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Why a connection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed locally on request.
    Requested,
    /// The server closed the stream.
    PeerClosed,
    /// An unrecoverable read, write, or decode error.
    Failed,
}

impl CloseReason {
    /// Returns `true` unless the close was requested locally.
    #[must_use]
    pub const fn is_unexpected(self) -> bool {
        !matches!(self, Self::Requested)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::PeerClosed => "peer_closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Notification delivered to a connection's close hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Identifier of the closed connection.
    pub connection_id: u64,
    /// Identity the connection served.
    pub client_id: String,
    /// Cause of the close.
    pub reason: CloseReason,
}

/// Callback invoked once when a connection closes.
pub type CloseHook = Box<dyn FnOnce(CloseEvent) + Send>;

/// Snapshot of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// PING requests written.
    pub heartbeats_sent: u64,
    /// PING replies received.
    pub heartbeat_acks: u64,
    /// Reader-idle periods observed.
    pub reader_idle_events: u64,
}

#[derive(Debug, Default)]
struct Counters {
    heartbeats_sent: AtomicU64,
    heartbeat_acks: AtomicU64,
    reader_idle_events: AtomicU64,
}

/// Live connection shared by callers and its I/O threads.
pub struct Connection {
    id: u64,
    client_id: String,
    endpoint: ServerEndpoint,
    writer: Mutex<TcpStream>,
    pending: Arc<CorrelationRegistry>,
    open: AtomicBool,
    last_write: Mutex<Instant>,
    counters: Counters,
    stop_heartbeat: Mutex<Option<Sender<()>>>,
    on_close: Mutex<Option<CloseHook>>,
}

impl Connection {
    /// Dials `endpoint` and starts the connection's I/O threads.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Resolve`] or [`ClientError::Connect`] when the
    /// server cannot be reached, and [`ClientError::Configure`] when the socket
    /// or its threads cannot be set up.
    pub fn open(
        client_id: impl Into<String>,
        endpoint: &ServerEndpoint,
        settings: &ConnectionSettings,
        on_close: Option<CloseHook>,
    ) -> Result<Arc<Self>, ClientError> {
        let address = endpoint.resolve().map_err(|source| ClientError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?;
        let stream =
            TcpStream::connect_timeout(&address, settings.connect_timeout).map_err(|source| {
                ClientError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                }
            })?;
        let configure = |source| ClientError::Configure {
            endpoint: endpoint.to_string(),
            source,
        };
        stream.set_nodelay(true).map_err(configure)?;
        stream
            .set_read_timeout(settings.read_timeout)
            .map_err(configure)?;
        let read_half = stream.try_clone().map_err(configure)?;

        let (stop_sender, stop_receiver) = channel::bounded::<()>(0);
        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            client_id: client_id.into(),
            endpoint: endpoint.clone(),
            writer: Mutex::new(stream),
            pending: Arc::new(CorrelationRegistry::new()),
            open: AtomicBool::new(true),
            last_write: Mutex::new(Instant::now()),
            counters: Counters::default(),
            stop_heartbeat: Mutex::new(Some(stop_sender)),
            on_close: Mutex::new(on_close),
        });

        let inbound = Arc::clone(&connection);
        if let Err(source) = thread::Builder::new()
            .name(format!("courier-reader-{}", connection.id))
            .spawn(move || reader::run(&inbound, read_half))
        {
            connection.abandon();
            return Err(configure(source));
        }

        if !settings.heartbeat_interval.is_zero() {
            let outbound = Arc::clone(&connection);
            let interval = settings.heartbeat_interval;
            if let Err(source) = thread::Builder::new()
                .name(format!("courier-heartbeat-{}", connection.id))
                .spawn(move || heartbeat::run(&outbound, &stop_receiver, interval))
            {
                connection.abandon();
                return Err(configure(source));
            }
        }

        info!(
            target: CONNECTION_TARGET,
            connection_id = connection.id,
            client_id = %connection.client_id,
            endpoint = %connection.endpoint,
            "connection established"
        );
        Ok(connection)
    }

    /// Registers `request` and writes it.
    ///
    /// The returned handle completes when the matching response arrives.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] when the id cannot be registered or the write
    /// fails.
    pub fn call(&self, request: &Request) -> Result<PendingCall, CallError> {
        let pending = self.pending.register(request.request_id())?;
        self.send(request)?;
        Ok(pending)
    }

    /// Writes a request without registering it.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ConnectionClosed`] on a closed connection and
    /// [`CallError::Codec`] when encoding or writing fails. A failed write
    /// tears the connection down.
    pub fn send(&self, request: &Request) -> Result<(), CallError> {
        if !self.is_open() {
            return Err(CallError::ConnectionClosed);
        }
        let frame = codec::encode(request)?;
        let written = {
            let mut writer = lock(&self.writer);
            writer.write_all(&frame).and_then(|()| writer.flush())
        };
        if let Err(error) = written {
            debug!(
                target: CONNECTION_TARGET,
                connection_id = self.id,
                error = %error,
                "write failed"
            );
            self.teardown(CloseReason::Failed);
            return Err(CallError::Codec(error.into()));
        }
        *lock(&self.last_write) = Instant::now();
        Ok(())
    }

    /// Closes the connection. Idempotent.
    pub fn close(&self) {
        self.teardown(CloseReason::Requested);
    }

    /// Process-unique identifier of this connection.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Identity this connection serves.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Server endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Returns `true` until the connection is torn down.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Calls still waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            heartbeats_sent: self.counters.heartbeats_sent.load(Ordering::Relaxed),
            heartbeat_acks: self.counters.heartbeat_acks.load(Ordering::Relaxed),
            reader_idle_events: self.counters.reader_idle_events.load(Ordering::Relaxed),
        }
    }

    fn last_write(&self) -> Instant {
        *lock(&self.last_write)
    }

    /// Tears down a connection that never finished opening, without
    /// notifying the close hook.
    fn abandon(&self) {
        drop(lock(&self.on_close).take());
        self.teardown(CloseReason::Failed);
    }

    fn teardown(&self, reason: CloseReason) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        drop(lock(&self.stop_heartbeat).take());
        if let Err(error) = lock(&self.writer).shutdown(Shutdown::Both) {
            debug!(
                target: CONNECTION_TARGET,
                connection_id = self.id,
                error = %error,
                "socket shutdown failed"
            );
        }
        info!(
            target: CONNECTION_TARGET,
            connection_id = self.id,
            client_id = %self.client_id,
            reason = %reason,
            pending = self.pending.len(),
            "connection closed"
        );
        let close_hook = lock(&self.on_close).take();
        if let Some(hook) = close_hook {
            hook(CloseEvent {
                connection_id: self.id,
                client_id: self.client_id.clone(),
                reason,
            });
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
