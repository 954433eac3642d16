pub use app_error::{AppError, AppResult};
pub use config::{
    global_config, LogConfig, NetworkConfig, RegistryConfig, ServerConfig, SessionConfig,
    GLOBAL_CONFIG,
};
pub use gateway::Gateway;
pub use server::{start_reaper, Server};
pub use shutdown::{Shutdown, ShutdownCoordinator};
pub use tracing_config::{setup_local_tracing, setup_tracing, OtelGuard};

mod app_error;
mod config;
mod gateway;
mod server;
mod shutdown;
mod tracing_config;
