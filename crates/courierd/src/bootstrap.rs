//! Server bootstrap orchestration.

use std::net::SocketAddr;
use std::sync::Arc;

use courier_config::Config;
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use crate::connections::ServerConnectionRegistry;
use crate::dispatch::handler::DispatchConnectionHandler;
use crate::dispatch::{Dispatcher, PoolError, ServiceRegistry, WorkerPool};
use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{ListenerError, ListenerHandle, SocketListener};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any configuration layer is invalid.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that returns a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced while bootstrapping or starting the server.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The worker pool could not be started.
    #[error("failed to start worker pool: {source}")]
    Pool {
        /// Underlying pool error.
        #[source]
        source: PoolError,
    },
    /// The listener could not be bound or started.
    #[error("failed to start listener: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

/// A configured server that has not started listening yet.
pub struct Server {
    config: Config,
    services: Arc<ServiceRegistry>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Server {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryHandle {
        &self.telemetry
    }

    /// Services the server will dispatch to.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Starts the worker pool and the listener.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Pool`] or [`BootstrapError::Listener`] when
    /// either component fails to start; the reporter is notified first.
    pub fn serve(self) -> Result<ServerHandle, BootstrapError> {
        let reporter = Arc::clone(&self.reporter);
        self.start().inspect_err(|error| reporter.bootstrap_failed(error))
    }

    fn start(self) -> Result<ServerHandle, BootstrapError> {
        let pool = WorkerPool::new(self.config.worker_threads())
            .map(Arc::new)
            .map_err(|source| BootstrapError::Pool { source })?;
        let listener = SocketListener::bind(self.config.server_endpoint())
            .map_err(|source| BootstrapError::Listener { source })?;
        let local_addr = listener.local_addr();

        let connections = Arc::new(ServerConnectionRegistry::new());
        let handler = Arc::new(DispatchConnectionHandler::new(
            Dispatcher::new(Arc::clone(&self.services)),
            Arc::clone(&pool),
            Arc::clone(&connections),
        ));
        let listener = listener
            .start(handler)
            .map_err(|source| BootstrapError::Listener { source })?;

        self.reporter.server_listening(local_addr, pool.size());
        Ok(ServerHandle {
            local_addr,
            listener,
            pool,
            connections,
            reporter: self.reporter,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    listener: ListenerHandle,
    pool: Arc<WorkerPool>,
    connections: Arc<ServerConnectionRegistry>,
    reporter: Arc<dyn HealthReporter>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live client connections, for server-initiated pushes.
    #[must_use]
    pub fn connections(&self) -> &ServerConnectionRegistry {
        &self.connections
    }

    /// Stops accepting connections and new jobs.
    pub fn shutdown(&self) {
        self.listener.shutdown();
        self.pool.close();
    }

    /// Shuts down and waits for the listener and queued jobs to finish.
    ///
    /// Established connections are not severed; they stop receiving
    /// dispatch and are answered with shutdown failures until the peer
    /// disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when a background thread panicked.
    pub fn join(self) -> Result<(), BootstrapError> {
        self.shutdown();
        let listener = self
            .listener
            .join()
            .map_err(|source| BootstrapError::Listener { source });
        let pool = self
            .pool
            .join()
            .map_err(|source| BootstrapError::Pool { source });
        self.reporter.server_stopped();
        listener.and(pool)
    }
}

/// Loads configuration and initialises telemetry.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration or telemetry fails. The
/// reporter is notified before the error is returned.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    services: ServiceRegistry,
) -> Result<Server, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    reporter.bootstrap_succeeded(&config);
    Ok(Server {
        config,
        services: Arc::new(services),
        telemetry,
        reporter,
    })
}
