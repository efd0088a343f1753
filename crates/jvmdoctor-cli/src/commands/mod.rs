pub mod diagnose;
pub mod fleet;
pub mod hub;
pub mod monitor;
pub mod threads;
pub mod watch;

use jvmdoctor_core::{DashboardConfig, HttpHubApi, ProcessId};

/// Parse the hub URL or exit.
pub fn make_config(hub: &str) -> DashboardConfig {
    match DashboardConfig::with_hub(hub) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid hub URL '{hub}': {e}");
            std::process::exit(2);
        }
    }
}

/// Build an HTTP client for the hub or exit.
pub fn make_api(config: &DashboardConfig) -> HttpHubApi {
    match HttpHubApi::new(&config.hub) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    }
}

pub fn make_runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            std::process::exit(1);
        }
    }
}

/// Unwrap a hub call or print what failed and exit.
pub fn or_exit<T>(result: jvmdoctor_core::Result<T>, what: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Failed to {what}: {e}");
            std::process::exit(1);
        }
    }
}

pub fn process_id(raw: &str) -> ProcessId {
    ProcessId::new(raw.trim())
}
