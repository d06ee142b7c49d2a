//! Session management module.
//!
//! This module provides shell selection, PTY spawning, the session table, the
//! per-session output bridge, the control handlers and the idle reaper.

mod bridge;
pub mod manager;
pub mod pty;
mod reaper;
pub mod shell;
pub mod table;

pub use manager::{SessionInfo, SessionManager};
pub use pty::{Pty, PtyReader, SessionError, SessionId};
pub use shell::resolve_shell;
pub use table::{Clock, Session, SessionTable};
