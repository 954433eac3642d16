use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::{runtime, signal};
use tracing::{error, info, trace};

use super::server::{start_reaper, Server};
use super::{ServerConfig, ShutdownCoordinator};
use crate::network::{FrameHandler, PingPongHandler, SessionRegistry};
use crate::AppError::IllegalStateError;
use crate::AppResult;

/// Process bootstrap: listener, reaper and orderly shutdown around one
/// [`SessionRegistry`].
pub struct Gateway {
    config: ServerConfig,
    handler: Arc<dyn FrameHandler>,
}

impl Gateway {
    pub fn new(config: ServerConfig) -> Self {
        Gateway {
            config,
            handler: Arc::new(PingPongHandler),
        }
    }

    /// Replaces the default ping/pong dispatch table.
    pub fn with_handler(mut self, handler: Arc<dyn FrameHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Runs until Ctrl-C, then stops every session and waits for the reaper
    /// and the accept loop to let go.
    pub fn start(&self, rt: &runtime::Runtime) -> AppResult<()> {
        let coordinator = ShutdownCoordinator::new();
        let registry = SessionRegistry::new(self.config.session.clone(), self.handler.clone());

        rt.block_on(self.run_tcp_server(registry.clone(), &coordinator))?;

        // tcp server has been shutdown, send shutdown signal
        coordinator.trigger();
        let stopped = rt.block_on(registry.stop_all());
        info!(stopped, "sessions stopped");

        // wait for shutdown complete
        trace!("waiting for shutdown complete...");
        rt.block_on(coordinator.wait_complete());
        info!("gateway shutdown complete");
        Ok(())
    }

    async fn run_tcp_server(
        &self,
        registry: SessionRegistry,
        coordinator: &ShutdownCoordinator,
    ) -> AppResult<()> {
        let network_conf = &self.config.network;
        let listen_address = format!("{}:{}", network_conf.ip, network_conf.port);

        let listener = match TcpListener::bind(&listen_address).await {
            Ok(listener) => listener,
            Err(err) => {
                let error_msg = format!(
                    "Failed to bind server to address: {} - Error: {}",
                    listen_address, err
                );
                error!("{}", error_msg);
                return Err(IllegalStateError(error_msg));
            }
        };
        info!("tcp server binding to {} for listening", &listen_address);

        let _reaper = start_reaper(
            registry.clone(),
            Duration::from_millis(self.config.registry.reap_interval_ms),
            coordinator.subscribe(),
        );

        let mut server = Server::new(
            listener,
            registry,
            network_conf.max_connection,
            coordinator.subscribe(),
        );
        tokio::select! {
          res = server.run() => {
              if let Err(err) = res {
                  error!(cause = %err, "failed to accept");
              }
          }
          _ = signal::ctrl_c() => {
              info!("get shutdown signal");
          }
        }

        Ok(())
    }
}
