//! Session records and the concurrent session table.
//!
//! The table is a `DashMap` owned by whoever builds the manager; callers never
//! hold a map guard across an await, they clone the `Arc<Session>` out first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use dashmap::DashMap;
use protocol::CorrelationContext;
use tokio::task::JoinHandle;

use super::pty::{Pty, SessionId};

/// Monotonic clock counting whole seconds since it was created.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Starts a new clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds elapsed since the clock was created.
    pub fn now(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// One PTY-backed shell bound to a terminal identifier.
pub struct Session {
    id: SessionId,
    pty: Pty,
    context: CorrelationContext,
    /// Clock seconds of the last observed input or output.
    last_activity: AtomicU64,
    bridge: OnceLock<JoinHandle<()>>,
}

impl Session {
    /// Creates a session record for a freshly spawned PTY.
    pub fn new(id: SessionId, pty: Pty, context: CorrelationContext, now: u64) -> Self {
        Self {
            id,
            pty,
            context,
            last_activity: AtomicU64::new(now),
            bridge: OnceLock::new(),
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the PTY handle.
    pub fn pty(&self) -> &Pty {
        &self.pty
    }

    /// Returns the context notifications for this session are addressed to.
    pub fn context(&self) -> &CorrelationContext {
        &self.context
    }

    /// Returns the clock seconds of the last activity.
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    /// Records activity at `now`. Never moves the timestamp backwards.
    pub fn touch(&self, now: u64) {
        self.last_activity.fetch_max(now, Ordering::SeqCst);
    }

    /// Seconds since the last activity.
    pub fn idle_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_activity())
    }

    /// Returns whether the PTY has been closed.
    pub fn is_closed(&self) -> bool {
        self.pty.is_closed()
    }

    /// Retains the handle of the bridge task.
    ///
    /// Returns `false`, leaving the first handle in place, if one was
    /// already attached.
    pub fn attach_bridge(&self, handle: JoinHandle<()>) -> bool {
        self.bridge.set(handle).is_ok()
    }

    /// Returns whether a bridge task is attached and still running.
    pub fn bridge_running(&self) -> bool {
        self.bridge
            .get()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Concurrency-safe map from terminal identifier to session.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session, returning the one it replaced.
    pub fn insert(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions.insert(session.id().clone(), session)
    }

    /// Looks up a session.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes whatever session is stored under `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Removes `session` only if the table still maps its ID to it.
    ///
    /// A newer session created under the same identifier is left alone.
    pub fn remove_same(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Closes the session's PTY and removes its entry.
    ///
    /// This is the single teardown path shared by kill, the reaper and the
    /// bridge task. Returns `true` if this call closed the PTY.
    pub async fn evict(&self, session: &Arc<Session>) -> bool {
        let closed = session.pty().close().await;
        if self.remove_same(session) {
            tracing::debug!(session_id = %session.id(), "Removed session from table");
        }
        closed
    }

    /// Returns a point-in-time copy of every entry.
    ///
    /// Safe while other tasks insert or remove entries.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Checks if a session with this ID is present.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
