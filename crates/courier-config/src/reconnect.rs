//! Reconnection policy applied after a connection is torn down.
//!
//! The lazy mode keeps the reference behaviour: nothing happens until the
//! next call for the same identity, which transparently opens a fresh
//! connection. The eager mode re-dials in the background with exponential
//! backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Selects how the client reacts to a fatally closed connection.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReconnectMode {
    /// Reconnect on the next request for the identity.
    #[default]
    Lazy,
    /// Reconnect in the background straight after a fatal close.
    Eager,
}

/// Resolved reconnection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Selected mode.
    pub mode: ReconnectMode,
    /// Maximum eager attempts.
    pub attempts: u32,
    /// Delay before the first eager attempt; doubled after each failure.
    pub initial_backoff: Duration,
}

impl ReconnectPolicy {
    /// Policy that never reconnects proactively.
    #[must_use]
    pub const fn lazy() -> Self {
        Self {
            mode: ReconnectMode::Lazy,
            attempts: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Policy that reconnects eagerly.
    #[must_use]
    pub const fn eager(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            mode: ReconnectMode::Eager,
            attempts,
            initial_backoff,
        }
    }

    /// Returns `true` when a fatal close should trigger a background re-dial.
    #[must_use]
    pub const fn is_eager(&self) -> bool {
        matches!(self.mode, ReconnectMode::Eager) && self.attempts > 0
    }

    /// Backoff before the given zero-based attempt.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::lazy()
    }
}
