pub mod network;
pub mod service;

pub use network::{
    Frame, FrameDecoder, FrameError, FrameHandler, PingPongHandler, SessionContext,
    SessionRegistry,
};
pub use service::{
    global_config, setup_local_tracing, setup_tracing, AppError, AppResult, Gateway,
    ServerConfig, SessionConfig, Shutdown, ShutdownCoordinator, GLOBAL_CONFIG,
};
