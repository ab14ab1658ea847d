//! Session lifecycle management for generation requests.
//!
//! Tracks active generations, enforces the concurrency limit, and gives
//! each generation a cancellation token that fires when its client goes
//! away or the server shuts down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tracks active generation sessions and controls concurrency.
pub struct SessionManager {
    /// Cancellation tokens of active sessions, keyed by session ID.
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    /// Semaphore limiting concurrent generations. Closed on shutdown.
    concurrency_limit: Arc<Semaphore>,
    /// Maximum allowed concurrent sessions.
    max_concurrent: usize,
}

/// A guard that releases session resources when dropped.
///
/// The SSE stream owns the guard. When the HTTP connection drops, axum
/// drops the stream, the guard cancels its token and frees the slot.
pub struct SessionGuard {
    session_id: Uuid,
    cancel: CancellationToken,
    manager: Arc<SessionManager>,
    _permit: OwnedSemaphorePermit,
}

impl SessionGuard {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Token checked by the generation loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.manager.active().remove(&self.session_id);
    }
}

impl SessionManager {
    /// Create a new session manager with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            concurrency_limit: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        })
    }

    fn active(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a session slot without waiting. Returns None if at capacity
    /// or closed.
    pub fn try_acquire(self: &Arc<Self>, session_id: Uuid) -> Option<SessionGuard> {
        let permit = self.concurrency_limit.clone().try_acquire_owned().ok()?;
        let cancel = CancellationToken::new();
        self.active().insert(session_id, cancel.clone());

        Some(SessionGuard {
            session_id,
            cancel,
            manager: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Refuse new sessions and cancel every active one. Returns how many
    /// were cancelled.
    pub fn close(&self) -> usize {
        self.concurrency_limit.close();
        let active = self.active();
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }

    pub fn is_closed(&self) -> bool {
        self.concurrency_limit.is_closed()
    }

    /// Number of currently active sessions.
    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// Maximum concurrent sessions allowed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of available slots.
    pub fn available_permits(&self) -> usize {
        self.concurrency_limit.available_permits()
    }
}
