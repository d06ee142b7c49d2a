//! Session manager: the terminal control handlers.
//!
//! The manager owns the session table and exposes one entry point per
//! control action. A request against a session that is gone is answered with
//! a `quitTerminal` notice to the caller's context rather than an error.

use std::sync::Arc;
use std::time::Duration;

use protocol::{
    quit_notice, CorrelationContext, CreateTerminal, InputTerminal, KillTerminal, PingTerminal,
    ResizeTerminal, TerminalSize, SESSION_CLOSED_MSG,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::bridge::{spawn_bridge, BridgeContext};
use super::pty::{Pty, SessionError, SessionId};
use super::shell::resolve_shell;
use super::table::{Clock, Session, SessionTable};
use crate::config::{Config, ReaperConfig, SessionConfig};
use crate::sink::PacketSink;

/// How long shutdown waits for bridge tasks to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Information about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Terminal identifier.
    pub id: SessionId,
    /// Process ID of the shell.
    pub pid: Option<u32>,
    /// Seconds since the last input or output.
    pub idle_secs: u64,
    /// Whether the PTY has been closed.
    pub closed: bool,
}

/// Creates, drives and tears down terminal sessions.
pub struct SessionManager<S: PacketSink> {
    pub(super) table: Arc<SessionTable>,
    sink: Arc<S>,
    settings: SessionConfig,
    pub(super) reaper: ReaperConfig,
    pub(super) clock: Clock,
    /// Serializes the limit check with the insert.
    admission: Mutex<()>,
    pub(super) tasks: TaskTracker,
    pub(super) shutdown: CancellationToken,
}

impl<S: PacketSink> SessionManager<S> {
    /// Creates a manager with its own empty session table.
    pub fn new(config: &Config, sink: Arc<S>) -> Self {
        Self::with_table(config, sink, Arc::new(SessionTable::new()))
    }

    /// Creates a manager over an existing session table.
    pub fn with_table(config: &Config, sink: Arc<S>, table: Arc<SessionTable>) -> Self {
        Self {
            table,
            sink,
            settings: config.session.clone(),
            reaper: config.reaper.clone(),
            clock: Clock::new(),
            admission: Mutex::new(()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the session table.
    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// Spawns a shell for `req.terminal` and starts streaming its output.
    ///
    /// Nothing is inserted and no task is started if spawning fails. An
    /// existing session under the same identifier is torn down and replaced.
    pub async fn create(
        &self,
        req: CreateTerminal,
        context: CorrelationContext,
    ) -> Result<(), SessionError> {
        // Checked again under the admission lock before inserting.
        if self.at_capacity(&req.terminal) {
            return Err(self.limit_reached(&req.terminal));
        }

        let shell = resolve_shell(&self.settings.shell_candidates, &self.settings.fallback_shell);
        let size = TerminalSize {
            width: self.settings.cols,
            height: self.settings.rows,
        };

        let (pty, reader) = Pty::spawn(&shell, size).inspect_err(|e| {
            tracing::error!(session_id = %req.terminal, shell = %shell, error = %e, "Failed to spawn shell");
        })?;
        let pid = pty.pid();

        let session = Arc::new(Session::new(req.terminal, pty, context, self.clock.now()));

        let previous = {
            let _admission = self.admission.lock().await;
            if self.at_capacity(session.id()) {
                let err = self.limit_reached(session.id());
                session.pty().close().await;
                return Err(err);
            }
            self.table.insert(Arc::clone(&session))
        };

        if let Some(previous) = previous {
            tracing::warn!(session_id = %session.id(), "Replacing existing session");
            previous.pty().close().await;
        }

        let handle = spawn_bridge(
            &self.tasks,
            Arc::clone(&session),
            reader,
            BridgeContext {
                table: Arc::clone(&self.table),
                sink: Arc::clone(&self.sink),
                clock: self.clock,
                chunk_size: self.settings.read_chunk_size,
            },
        );
        session.attach_bridge(handle);

        tracing::info!(
            session_id = %session.id(),
            shell = %shell,
            pid = ?pid,
            "Created new session"
        );

        Ok(())
    }

    /// Writes decoded keystrokes to a session.
    ///
    /// Write failures are logged and otherwise ignored; a failing PTY ends
    /// its own bridge task, which reports the closure.
    pub async fn input(&self, req: InputTerminal, context: &CorrelationContext) {
        let Some(session) = self.live_session(&req.terminal, context).await else {
            return;
        };

        session.touch(self.clock.now());
        if let Err(e) = session.pty().write(&req.input).await {
            tracing::warn!(session_id = %req.terminal, error = %e, "Failed to write input");
        }
    }

    /// Applies new terminal dimensions to a session.
    pub async fn resize(&self, req: ResizeTerminal, context: &CorrelationContext) {
        let Some(session) = self.live_session(&req.terminal, context).await else {
            return;
        };

        match session.pty().resize(req.size).await {
            Ok(()) => tracing::debug!(
                session_id = %req.terminal,
                cols = req.size.width,
                rows = req.size.height,
                "Resized PTY"
            ),
            Err(e) => {
                tracing::warn!(session_id = %req.terminal, error = %e, "Failed to resize PTY")
            }
        }
    }

    /// Terminates a session and removes it from the table.
    ///
    /// A lingering entry whose PTY is already closed is removed as well and
    /// answered with a `quitTerminal` notice.
    pub async fn kill(&self, req: KillTerminal, context: &CorrelationContext) {
        let Some(session) = self.table.get(&req.terminal) else {
            self.notify_closed(&req.terminal, context).await;
            return;
        };

        if session.is_closed() {
            self.table.remove_same(&session);
            self.notify_closed(&req.terminal, context).await;
            return;
        }

        if self.table.evict(&session).await {
            tracing::info!(session_id = %req.terminal, "Session killed and removed");
        }
    }

    /// Marks a session as active without touching the PTY.
    pub async fn ping(&self, req: PingTerminal, context: &CorrelationContext) {
        if let Some(session) = self.live_session(&req.terminal, context).await {
            session.touch(self.clock.now());
        }
    }

    /// Looks up a session, answering with `quitTerminal` if it is absent or
    /// its PTY is already closed.
    async fn live_session(&self, id: &str, context: &CorrelationContext) -> Option<Arc<Session>> {
        match self.table.get(id) {
            Some(session) if !session.is_closed() => Some(session),
            _ => {
                self.notify_closed(id, context).await;
                None
            }
        }
    }

    async fn notify_closed(&self, id: &str, context: &CorrelationContext) {
        tracing::debug!(session_id = %id, "Request for closed session");
        self.sink
            .deliver(quit_notice(context, Some(SESSION_CLOSED_MSG)))
            .await;
    }

    /// Whether creating `id` would exceed the session limit. Replacing an
    /// existing id never does.
    fn at_capacity(&self, id: &str) -> bool {
        self.table.len() >= self.settings.max_sessions && !self.table.contains(id)
    }

    fn limit_reached(&self, id: &str) -> SessionError {
        tracing::warn!(
            session_id = %id,
            max_sessions = self.settings.max_sessions,
            "Session limit reached"
        );
        SessionError::LimitReached(self.settings.max_sessions)
    }

    /// Returns a session by ID.
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.table.get(id)
    }

    /// Checks if a session exists.
    pub fn exists(&self, id: &str) -> bool {
        self.table.contains(id)
    }

    /// Returns the number of sessions in the table.
    pub fn count(&self) -> usize {
        self.table.len()
    }

    /// Lists all sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        let now = self.clock.now();
        self.table
            .snapshot()
            .into_iter()
            .map(|session| SessionInfo {
                id: session.id().clone(),
                pid: session.pty().pid(),
                idle_secs: session.idle_secs(now),
                closed: session.is_closed(),
            })
            .collect()
    }

    /// Stops the reaper, tears down every session and waits for the bridge
    /// tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();

        let ids: Vec<SessionId> = self
            .table
            .snapshot()
            .iter()
            .map(|session| session.id().clone())
            .collect();
        for id in ids {
            if let Some(session) = self.table.remove(&id) {
                session.pty().close().await;
            }
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Timed out waiting for session tasks"
            );
        }

        tracing::info!("Session manager stopped");
    }
}
