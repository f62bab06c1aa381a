//! Shared harness for the server's behavioural and unit suites.

mod config_loader;
mod reporter;
mod services;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use reporter::RecordingHealthReporter;
pub use services::{FOO_SERVICE, client_for, foo_services};
