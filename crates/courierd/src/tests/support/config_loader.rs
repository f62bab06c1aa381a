//! Configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use courier_config::{Config, LogFormat, ServerEndpoint};
use ortho_config::{OrthoConfig, OrthoError};

use crate::bootstrap::ConfigLoader;

/// Loader binding an ephemeral loopback port with a small worker pool.
#[derive(Debug, Default)]
pub struct TestConfigLoader;

impl TestConfigLoader {
    pub fn config() -> Config {
        Config {
            server_endpoint: ServerEndpoint::tcp("127.0.0.1", 0),
            worker_threads: 2,
            log_filter: "courierd=warn".to_owned(),
            log_format: LogFormat::Compact,
            ..Config::default()
        }
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Self::config())
    }
}

/// Loader that fails by passing an unsupported endpoint scheme.
#[derive(Debug, Default)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("courierd"),
            OsString::from("--server-endpoint"),
            OsString::from("unix:///tmp/courier.sock"),
        ];
        Config::load_from_iter(args)
    }
}
