use std::any::type_name;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::TrySendError;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::codec::{encode_frame, frame_size, MessageId};
use super::{FrameDecoder, FrameHandler};
use crate::service::SessionConfig;
use crate::{AppError, AppResult};

pub type SessionId = u64;

/// Called by a session's receive path once it has finished. Must not block.
pub(crate) type CloseNotifier = Box<dyn Fn(SessionId) + Send + Sync>;

/// State shared by a session's two tasks and anyone holding a reference to it.
///
/// This is what handlers and callers see. It can enqueue frames and request a
/// stop, but it cannot wait for the session to finish; only the
/// [`SessionHandle`] owned by the registry can.
#[derive(Debug)]
pub struct SessionContext {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    running: AtomicBool,
    outbound_tx: async_channel::Sender<Bytes>,
    stop_token: CancellationToken,
    max_frame_total: usize,
}

impl SessionContext {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Encodes a frame and queues it for the send path. Never waits.
    ///
    /// A full queue disconnects the session: a peer that does not keep up with
    /// its own replies is dropped rather than allowed to grow the queue.
    pub fn send_frame(&self, message_id: MessageId, payload: &[u8]) -> AppResult<()> {
        if !self.is_running() {
            return Err(AppError::SessionStopped(self.id));
        }
        if frame_size(payload.len()) > self.max_frame_total {
            return Err(AppError::PayloadTooLarge(payload.len()));
        }
        match self.outbound_tx.try_send(encode_frame(message_id, payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    session_id = self.id,
                    capacity = ?self.outbound_tx.capacity(),
                    "send queue full, disconnecting"
                );
                self.request_stop();
                Err(AppError::SendQueueFull(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(AppError::SessionStopped(self.id)),
        }
    }

    /// Asks both paths to finish. Safe to call any number of times, from any
    /// task, including the session's own.
    ///
    /// Queued frames are still written (each bounded by the drain timeout);
    /// a pending read is abandoned.
    pub fn request_stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!(session_id = self.id, "stop requested");
        }
        self.outbound_tx.close();
        self.stop_token.cancel();
    }

    pub fn queued_frames(&self) -> usize {
        self.outbound_tx.len()
    }
}

/// Owning handle of a running session: its context plus the join handles of
/// both tasks.
///
/// Neither task ever sees this handle, so neither can wait on itself.
#[derive(Debug)]
pub struct SessionHandle {
    context: Arc<SessionContext>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SessionHandle {
    /// Starts the receive and send tasks for `stream`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        id: SessionId,
        stream: TcpStream,
        config: &SessionConfig,
        handler: Arc<dyn FrameHandler>,
        on_close: CloseNotifier,
    ) -> SessionHandle {
        let peer_addr = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!(session_id = id, "set_nodelay failed: {}", e);
        }
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = async_channel::bounded(config.send_queue_capacity);

        let context = Arc::new(SessionContext {
            id,
            peer_addr,
            running: AtomicBool::new(true),
            outbound_tx,
            stop_token: CancellationToken::new(),
            max_frame_total: config.max_frame_total,
        });

        let receive_path = ReceivePath {
            context: context.clone(),
            reader: read_half,
            decoder: FrameDecoder::new(config.max_frame_total, config.max_recv_buffer),
            read_chunk_size: config.read_chunk_size,
            handler,
        };
        let send_path = SendPath {
            context: context.clone(),
            writer: BufWriter::new(write_half),
            outbound_rx,
            drain_timeout: config.drain_timeout(),
        };

        let span = info_span!("session", id);
        let reader = tokio::spawn(receive_path.run(on_close).instrument(span.clone()));
        let writer = tokio::spawn(send_path.run().instrument(span));

        info!(
            session_id = id,
            peer = ?peer_addr,
            monotonic_counter.sessions_opened = 1_u64,
            "session started"
        );

        SessionHandle {
            context,
            reader,
            writer,
        }
    }

    pub fn id(&self) -> SessionId {
        self.context.id
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn request_stop(&self) {
        self.context.request_stop();
    }

    /// True once both tasks have exited.
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.writer.is_finished()
    }

    /// Requests a stop and waits until both tasks have exited.
    ///
    /// Must not be awaited from inside either of this session's tasks.
    pub async fn stop(self) {
        let SessionHandle {
            context,
            reader,
            writer,
        } = self;
        context.request_stop();
        join_path(context.id, "receive", reader).await;
        join_path(context.id, "send", writer).await;
        info!(
            session_id = context.id,
            monotonic_counter.sessions_closed = 1_u64,
            "session joined"
        );
    }
}

fn get_type_name<T>(_: &T) -> &'static str {
    type_name::<T>()
}

async fn join_path(session_id: SessionId, path: &'static str, handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => {}
        Err(join_error) if join_error.is_panic() => {
            let payload = join_error.into_panic();
            if let Some(message) = payload.downcast_ref::<&'static str>() {
                error!(session_id, "{} path panicked with message: {}", path, message);
            } else if let Some(message) = payload.downcast_ref::<String>() {
                error!(session_id, "{} path panicked with message: {}", path, message);
            } else {
                error!(
                    session_id,
                    "{} path panicked with an unknown type: {}",
                    path,
                    get_type_name(&payload)
                );
            }
        }
        Err(_) => {
            debug!(session_id, "{} path was cancelled", path);
        }
    }
}

struct ReceivePath {
    context: Arc<SessionContext>,
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    read_chunk_size: usize,
    handler: Arc<dyn FrameHandler>,
}

/// Ends the session when the receive task ends, whether it returns or a
/// handler panics: stops both paths, then hands the session to whoever joins it.
struct CloseGuard {
    context: Arc<SessionContext>,
    on_close: Option<CloseNotifier>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(session_id = self.context.id, "receive path unwinding, closing session");
        }
        self.context.request_stop();
        if let Some(on_close) = self.on_close.take() {
            on_close(self.context.id);
        }
    }
}

impl ReceivePath {
    async fn run(mut self, on_close: CloseNotifier) {
        let id = self.context.id;
        let _close = CloseGuard {
            context: self.context.clone(),
            on_close: Some(on_close),
        };
        debug!(session_id = id, "receive path started");

        match self.read_loop().await {
            Ok(()) => debug!(session_id = id, "receive path finished"),
            Err(e) if e.is_protocol_violation() => {
                warn!(
                    session_id = id,
                    monotonic_counter.protocol_errors = 1_u64,
                    "closing connection: {}",
                    e
                );
            }
            Err(AppError::IoError(e)) => {
                debug!(session_id = id, "connection read failed: {}", e);
            }
            Err(e) => warn!(session_id = id, "closing connection: {}", e),
        }

        drop(self);
        debug!(session_id = id, "receive path exited");
    }

    async fn read_loop(&mut self) -> AppResult<()> {
        let mut chunk = vec![0u8; self.read_chunk_size];
        loop {
            let n = tokio::select! {
                biased;
                _ = self.context.stop_token.cancelled() => return Ok(()),
                res = self.reader.read(&mut chunk) => res?,
            };
            if n == 0 {
                // peer closed
                return Ok(());
            }
            self.decoder.append(&chunk[..n])?;

            while self.context.is_running() {
                match self.decoder.try_pop_frame()? {
                    Some(frame) => self.handler.handle(frame, &self.context)?,
                    None => break,
                }
            }
        }
    }
}

struct SendPath {
    context: Arc<SessionContext>,
    writer: BufWriter<OwnedWriteHalf>,
    outbound_rx: async_channel::Receiver<Bytes>,
    drain_timeout: Duration,
}

impl SendPath {
    async fn run(mut self) {
        let id = self.context.id;
        debug!(session_id = id, "send path started");

        if let Err(e) = self.write_loop().await {
            debug!(session_id = id, "send path failed: {}", e);
            self.context.request_stop();
        }
        let shutdown = self.writer.shutdown();
        if let Err(e) = bounded_by_drain(&self.context.stop_token, self.drain_timeout, shutdown).await
        {
            debug!(session_id = id, "shutdown of write half failed: {}", e);
        }
        debug!(session_id = id, "send path exited");
    }

    /// Writes frames in queue order until the queue is closed and empty.
    async fn write_loop(&mut self) -> AppResult<()> {
        while let Ok(frame) = self.outbound_rx.recv().await {
            let write = self.writer.write_all(&frame);
            bounded_by_drain(&self.context.stop_token, self.drain_timeout, write).await?;
            if self.outbound_rx.is_empty() {
                let flush = self.writer.flush();
                bounded_by_drain(&self.context.stop_token, self.drain_timeout, flush).await?;
            }
        }
        Ok(())
    }
}

/// Runs `fut` to completion while the session is running; once stop has been
/// requested it gets at most `drain_timeout` more.
async fn bounded_by_drain<F>(
    stop_token: &CancellationToken,
    drain_timeout: Duration,
    fut: F,
) -> AppResult<()>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        res = fut => res.map_err(AppError::from),
        _ = async {
            stop_token.cancelled().await;
            time::sleep(drain_timeout).await;
        } => Err(AppError::DetailedIoError(format!(
            "write did not finish within {:?} after stop",
            drain_timeout
        ))),
    }
}
