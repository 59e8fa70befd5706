// Service modules (daemon functionality)
pub mod process;
pub mod service_config;

// App state (configuration, paths)
pub mod state;

pub use process::{build_peer, spawn_service, start_service, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
pub use state::{AppConfig, AppState, StateError};
