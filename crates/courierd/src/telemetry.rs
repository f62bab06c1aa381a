//! Structured `tracing` output for the server.
//!
//! Everything a connection does, from the reader loop to the worker job that
//! dispatches its requests, runs inside a `connection` span carrying
//! `connection_id` and `peer`. JSON output flattens event fields and attaches
//! that span to each line; compact output prints it inline.

use std::io::{self, IsTerminal};
use std::net::SocketAddr;

use courier_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::{Span, Subscriber, info_span, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};

static INSTALLED: OnceCell<TelemetryHandle> = OnceCell::new();

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

/// Settings of the installed subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
    filter: String,
}

impl TelemetryHandle {
    /// Output format in effect.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }

    /// Filter directive in effect.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Rejected directive.
        filter: String,
        /// Parser message.
        message: String,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first use.
///
/// Only the first call installs anything. Every call returns the handle of
/// the subscriber actually in effect, which may differ from `config`.
///
/// ```rust
/// use courier_config::{Config, LogFormat};
/// use courierd::telemetry;
///
/// # fn main() -> Result<(), courierd::TelemetryError> {
/// let first = telemetry::initialise(&Config::default())?;
/// let compact = Config {
///     log_format: LogFormat::Compact,
///     ..Config::default()
/// };
/// let second = telemetry::initialise(&compact)?;
/// assert_eq!(first, second);
/// assert_eq!(second.format(), LogFormat::Json);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter does not parse or another
/// subscriber is already installed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED.get_or_try_init(|| install(config)).cloned()
}

/// Span wrapping all work done for one client connection.
pub(crate) fn connection_span(connection_id: u64, peer: Option<SocketAddr>) -> Span {
    info_span!(target: CONNECTION_TARGET, "connection", connection_id, peer = ?peer)
}

fn install(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    let filter = parse_filter(config.log_filter())?;
    let subscriber = build_subscriber(
        config.log_format(),
        filter,
        io::stderr,
        io::stderr().is_terminal(),
    );
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    Ok(TelemetryHandle {
        format: config.log_format(),
        filter: config.log_filter().to_owned(),
    })
}

fn parse_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|error| TelemetryError::Filter {
        filter: directive.to_owned(),
        message: error.to_string(),
    })
}

fn build_subscriber<W>(
    format: LogFormat,
    filter: EnvFilter,
    writer: W,
    ansi: bool,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    match format {
        LogFormat::Json => Box::new(
            builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .finish(),
        ),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    }
}
