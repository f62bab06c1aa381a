//! Per-connection registry of calls awaiting a response.
//!
//! A caller registers its request id before the request is written, then
//! blocks on the returned [`PendingCall`]. The connection's reader thread
//! publishes every decoded response here; the matching entry is removed and
//! its caller woken exactly once. Responses for ids nobody waits on are
//! dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use courier_protocol::{HEARTBEAT_REQUEST_ID, Response};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::CONNECTION_TARGET;
use crate::errors::CallError;

type Completion = Result<Response, CallError>;

#[derive(Debug)]
struct Slot {
    token: u64,
    sender: Sender<Completion>,
}

/// Correlates responses with the callers waiting for them.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    slots: DashMap<String, Slot>,
    next_token: AtomicU64,
}

impl CorrelationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call under `request_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ReservedRequestId`] for the heartbeat sentinel and
    /// [`CallError::DuplicateRequestId`] when the id is already pending.
    pub fn register(self: &Arc<Self>, request_id: &str) -> Result<PendingCall, CallError> {
        if request_id == HEARTBEAT_REQUEST_ID {
            return Err(CallError::ReservedRequestId {
                request_id: request_id.to_owned(),
            });
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = channel::bounded(1);
        match self.slots.entry(request_id.to_owned()) {
            Entry::Occupied(_) => Err(CallError::DuplicateRequestId {
                request_id: request_id.to_owned(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { token, sender });
                Ok(PendingCall {
                    request_id: request_id.to_owned(),
                    token,
                    receiver,
                    registry: Arc::clone(self),
                })
            }
        }
    }

    /// Resolves the call waiting on the response's id.
    ///
    /// Returns `false` when no call was waiting.
    pub fn complete(&self, response: Response) -> bool {
        let Some((_, slot)) = self.slots.remove(response.request_id()) else {
            debug!(
                target: CONNECTION_TARGET,
                request_id = response.request_id(),
                "discarding response without a pending call"
            );
            return false;
        };
        slot.sender.send(Ok(response)).is_ok()
    }

    /// Fails every pending call, building each error from its request id.
    ///
    /// Returns the number of callers notified.
    pub fn fail_all(&self, error: impl Fn(&str) -> CallError) -> usize {
        let request_ids: Vec<String> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        request_ids
            .into_iter()
            .filter_map(|request_id| self.slots.remove(&request_id))
            .filter(|(request_id, slot)| slot.sender.send(Err(error(request_id.as_str()))).is_ok())
            .count()
    }

    /// Number of calls currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no call is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns `true` when `request_id` is waiting.
    #[must_use]
    pub fn contains(&self, request_id: &str) -> bool {
        self.slots.contains_key(request_id)
    }

    fn withdraw(&self, request_id: &str, token: u64) {
        self.slots.remove_if(request_id, |_, slot| slot.token == token);
    }
}

/// Handle to a registered call.
///
/// Dropping the handle without waiting withdraws the registration.
#[derive(Debug)]
pub struct PendingCall {
    request_id: String,
    token: u64,
    receiver: Receiver<Completion>,
    registry: Arc<CorrelationRegistry>,
}

impl PendingCall {
    /// Correlation id of the call.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns `true` once a response or failure is ready.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Blocks until the call completes or `timeout` elapses.
    ///
    /// A timeout withdraws the registration but leaves the connection open;
    /// a response arriving later is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Timeout`] when nothing arrives in time,
    /// [`CallError::ReaderIdle`] when the connection went idle first, and
    /// [`CallError::ConnectionClosed`] when the registry was dropped.
    pub fn wait(self, timeout: Duration) -> Result<Response, CallError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => completion,
            Err(RecvTimeoutError::Timeout) => {
                self.registry.withdraw(&self.request_id, self.token);
                // A response may have landed between the timeout and the withdrawal.
                self.receiver.try_recv().unwrap_or_else(|_| {
                    Err(CallError::Timeout {
                        request_id: self.request_id.clone(),
                        timeout,
                    })
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(CallError::ConnectionClosed),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.registry.withdraw(&self.request_id, self.token);
    }
}
