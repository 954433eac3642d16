//! Session registry.
//!
//! Shutdown happens in two phases so that no task ever waits on itself:
//!
//! 1. When a session's receive path finishes it calls [`SessionRegistry::remove`],
//!    which only moves the handle from the active set to the pending-join set.
//! 2. Something outside every session (the reaper tick, or process shutdown)
//!    calls [`SessionRegistry::reap_pending`] / [`SessionRegistry::stop_all`],
//!    which take the handles out under the lock and then wait for them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

use super::session::{SessionContext, SessionHandle, SessionId};
use super::FrameHandler;
use crate::service::SessionConfig;

#[derive(Default)]
struct RegistryState {
    active: HashMap<SessionId, SessionHandle>,
    pending_join: Vec<SessionHandle>,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
    config: SessionConfig,
    handler: Arc<dyn FrameHandler>,
}

impl RegistryInner {
    fn remove(&self, id: SessionId) {
        let mut state = self.state.lock();
        if let Some(handle) = state.active.remove(&id) {
            state.pending_join.push(handle);
            trace!(session_id = id, "session moved to pending join");
        }
    }
}

/// Owner of every live session. Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SessionRegistry")
            .field("active", &state.active.len())
            .field("pending_join", &state.pending_join.len())
            .field("next_id", &self.inner.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, handler: Arc<dyn FrameHandler>) -> Self {
        SessionRegistry {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                next_id: AtomicU64::new(1),
                config,
                handler,
            }),
        }
    }

    /// Registers a freshly accepted connection and starts its two tasks.
    ///
    /// The tasks are spawned while the registry lock is held, so a session that
    /// ends immediately still finds itself in the active set when it calls
    /// [`SessionRegistry::remove`].
    pub fn create_session(&self, stream: TcpStream) -> Arc<SessionContext> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let on_close = Box::new(move |id: SessionId| {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });

        let mut state = self.inner.state.lock();
        let handle = SessionHandle::spawn(
            id,
            stream,
            &self.inner.config,
            self.inner.handler.clone(),
            on_close,
        );
        let context = handle.context().clone();
        state.active.insert(id, handle);
        context
    }

    /// Moves a finished session to the pending-join set. Never blocks on the
    /// session and ignores ids that are not active.
    pub fn remove(&self, id: SessionId) {
        self.inner.remove(id);
    }

    /// Joins every session that has finished on its own. Returns how many
    /// were joined.
    ///
    /// Must be driven from outside all sessions, e.g. a periodic timer task.
    pub async fn reap_pending(&self) -> usize {
        let pending = std::mem::take(&mut self.inner.state.lock().pending_join);
        let reaped = pending.len();
        for handle in pending {
            handle.stop().await;
        }
        if reaped > 0 {
            debug!(reaped, "reaped finished sessions");
        }
        reaped
    }

    /// Stops and joins every session, active or pending. Returns how many were
    /// joined.
    pub async fn stop_all(&self) -> usize {
        let sessions: Vec<SessionHandle> = {
            let mut state = self.inner.state.lock();
            let RegistryState {
                active,
                pending_join,
            } = std::mem::take(&mut *state);
            active.into_values().chain(pending_join).collect()
        };

        // signal everyone first so they wind down in parallel
        for handle in &sessions {
            handle.request_stop();
        }
        let stopped = sessions.len();
        for handle in sessions {
            handle.stop().await;
        }
        info!(stopped, "all sessions stopped");
        stopped
    }

    /// Size of the active set at the moment of the call.
    pub fn count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending_join.len()
    }

    /// Looks up an active session.
    pub fn get(&self, id: SessionId) -> Option<Arc<SessionContext>> {
        self.inner
            .state
            .lock()
            .active
            .get(&id)
            .map(|handle| handle.context().clone())
    }
}
