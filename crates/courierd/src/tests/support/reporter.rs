//! Test double for [`HealthReporter`] that records lifecycle events.

use std::net::SocketAddr;
use std::sync::Mutex;

use courier_config::Config;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;

/// Lifecycle events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    Starting,
    Succeeded,
    Failed(String),
    Listening(SocketAddr),
    Stopped,
}

impl HealthEvent {
    /// Short name used by feature files.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Listening(_) => "listening",
            Self::Stopped => "stopped",
        }
    }
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::Starting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::Succeeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::Failed(error.to_string()));
    }

    fn server_listening(&self, addr: SocketAddr, _workers: usize) {
        self.record(HealthEvent::Listening(addr));
    }

    fn server_stopped(&self) {
        self.record(HealthEvent::Stopped);
    }
}
