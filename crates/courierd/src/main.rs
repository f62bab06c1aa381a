use std::process::ExitCode;
use std::sync::Arc;

use courierd::dispatch::ServiceRegistry;
use courierd::{StructuredHealthReporter, SystemConfigLoader, bootstrap_with, echo_service};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info};

const MAIN_TARGET: &str = "courierd::main";

fn main() -> ExitCode {
    let mut services = ServiceRegistry::new();
    services.register(echo_service());

    let reporter = Arc::new(StructuredHealthReporter::new());
    let Ok(server) = bootstrap_with(&SystemConfigLoader, reporter, services) else {
        return ExitCode::FAILURE;
    };
    let mut signals = match Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP]) {
        Ok(signals) => signals,
        Err(source) => {
            error!(target: MAIN_TARGET, error = %source, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };
    let Ok(handle) = server.serve() else {
        return ExitCode::FAILURE;
    };

    if let Some(signal) = signals.forever().next() {
        info!(target: MAIN_TARGET, signal, "shutdown signal received");
    }
    match handle.join() {
        Ok(()) => ExitCode::SUCCESS,
        Err(source) => {
            error!(target: MAIN_TARGET, error = %source, "server did not stop cleanly");
            ExitCode::FAILURE
        }
    }
}
