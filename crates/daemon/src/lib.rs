//! # ptylink Daemon Library
//!
//! This crate drives interactive shells on the host on behalf of a remote
//! controller. Each shell runs inside its own pseudo-terminal and is
//! addressed by a caller-chosen terminal id.
//!
//! ## Overview
//!
//! - **Shell Resolution**: Pick the first installed shell from a candidate list
//! - **PTY Sessions**: Spawn, write to, resize and terminate shells
//! - **I/O Bridging**: Stream PTY output back as hex-encoded frames
//! - **Idle Reaping**: Evict sessions nobody has used for a while
//! - **Routing**: Turn inbound packets into typed control requests
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Router                             │
//! ├──────────────────────────────────────────────────────────┤
//! │                    Session Manager                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ Session Table│  │ Bridge Tasks │  │     Reaper     │  │
//! │  └──────────────┘  └──────────────┘  └────────────────┘  │
//! ├──────────────────────────────────────────────────────────┤
//! │                      Packet Sink                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::protocol::Packet;
//! use daemon::{Config, Router, SessionManager};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let (tx, mut rx) = mpsc::channel::<Packet>(64);
//!
//!     let sessions = Arc::new(SessionManager::new(&config, Arc::new(tx)));
//!     sessions.start_reaper();
//!
//!     let router = Router::new(Arc::clone(&sessions));
//!     router
//!         .route(Packet::new("initTerminal").with_field("terminal", "main"))
//!         .await?;
//!
//!     // The first frame is the shell's prompt.
//!     if let Some(packet) = rx.recv().await {
//!         println!("{}", packet.to_json()?);
//!     }
//!
//!     sessions.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY sessions, the session table, bridging and reaping
//! - [`router`]: Packet routing to the session manager
//! - [`sink`]: Outbound packet delivery

pub mod config;
pub mod router;
pub mod session;
pub mod sink;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    resolve_shell, Clock, Pty, Session, SessionError, SessionId, SessionInfo,
    SessionManager, SessionTable,
};

// Re-export router types for convenience
pub use router::{Router, RouterError, RouterResult};

pub use sink::PacketSink;
