use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Shutdown;
use crate::network::SessionRegistry;
use crate::{AppError, AppResult};

/// Accept loop: turns every accepted socket into a registered session.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    registry: SessionRegistry,
    max_connection: usize,
    shutdown: Shutdown,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        registry: SessionRegistry,
        max_connection: usize,
        shutdown: Shutdown,
    ) -> Self {
        Server {
            listener,
            registry,
            max_connection,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until shutdown is signalled or accepting itself
    /// fails for good.
    ///
    /// Connections beyond `max_connection` active sessions are closed right
    /// away. Sessions outlive this loop; the caller stops them with
    /// [`SessionRegistry::stop_all`].
    #[tracing::instrument(skip(self))]
    pub async fn run(&mut self) -> AppResult<()> {
        loop {
            let (socket, peer) = tokio::select! {
                res = accept(&self.listener) => res?,
                _ = self.shutdown.recv() => {
                    debug!("accept loop received shutdown signal");
                    return Ok(());
                }
            };

            let active = self.registry.count();
            if active >= self.max_connection {
                warn!(%peer, active, "connection limit reached, rejecting");
                drop(socket);
                continue;
            }

            let session = self.registry.create_session(socket);
            debug!(session_id = session.id(), %peer, "accepted new connection");
        }
    }
}

async fn accept(listener: &TcpListener) -> AppResult<(TcpStream, SocketAddr)> {
    let mut backoff = 1;

    loop {
        match listener.accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(err) => {
                if backoff > 64 {
                    return Err(AppError::Accept(format!(
                        "accept tcp server error: {}",
                        err
                    )));
                }
                warn!("accept failed, retrying in {}s: {}", backoff, err);
            }
        }

        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}

/// Periodically joins sessions that have finished on their own.
///
/// A reap in progress always runs to completion; the shutdown signal is only
/// observed between ticks, so no taken-out session is ever left unjoined.
pub fn start_reaper(
    registry: SessionRegistry,
    reap_interval: Duration,
    mut shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(reap_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("session reaper started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("session reaper received shutdown signal");
                    break;
                }
                _ = interval.tick() => {}
            }
            registry.reap_pending().await;
        }
        info!("session reaper exited");
    })
}
