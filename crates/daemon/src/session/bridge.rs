//! Per-session I/O bridge.
//!
//! One task per session forwards PTY output as `outputTerminal` frames and,
//! once the stream ends or the PTY is closed, sends a single `quitTerminal`
//! notice and tears the session down.
//!
//! The blocking reads happen on a dedicated thread. A job that outlives the
//! shell can keep the terminal open, so closing the PTY wakes the task
//! directly instead of waiting for the read to fail.

use std::io::Read;
use std::sync::Arc;

use protocol::{output_frame, quit_notice};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::pty::{PtyReader, SessionId};
use super::table::{Clock, Session, SessionTable};
use crate::sink::PacketSink;

/// Chunks buffered between the reader thread and the bridge task.
const READ_QUEUE_DEPTH: usize = 16;

/// Everything a bridge task needs besides its session.
pub(crate) struct BridgeContext<S: PacketSink> {
    pub table: Arc<SessionTable>,
    pub sink: Arc<S>,
    pub clock: Clock,
    pub chunk_size: usize,
}

/// Spawns the bridge task for `session` on `tracker`.
pub(crate) fn spawn_bridge<S: PacketSink>(
    tracker: &TaskTracker,
    session: Arc<Session>,
    reader: PtyReader,
    ctx: BridgeContext<S>,
) -> JoinHandle<()> {
    tracker.spawn(run_bridge(session, reader, ctx))
}

async fn run_bridge<S: PacketSink>(session: Arc<Session>, reader: PtyReader, ctx: BridgeContext<S>) {
    let session_id = session.id().clone();
    let closed = session.pty().close_token();
    let (tx, mut rx) = mpsc::channel(READ_QUEUE_DEPTH);

    if let Err(e) = spawn_reader(&session_id, reader, ctx.chunk_size, tx) {
        tracing::error!(session_id = %session_id, error = %e, "Failed to start PTY reader");
    }

    tracing::debug!(session_id = %session_id, "Bridge started");

    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => {
                tracing::debug!(session_id = %session_id, "PTY closed");
                break;
            }
            chunk = rx.recv() => {
                let Some(chunk) = chunk else {
                    break;
                };
                session.touch(ctx.clock.now());
                ctx.sink.deliver(output_frame(session.context(), &chunk)).await;
            }
        }
    }

    ctx.sink.deliver(quit_notice(session.context(), None)).await;
    ctx.table.evict(&session).await;

    tracing::debug!(session_id = %session_id, "Bridge ended");
}

/// Starts the thread that performs blocking reads on the PTY.
///
/// The thread exits on EOF, on a read error, or once the bridge task has
/// dropped its receiver.
fn spawn_reader(
    session_id: &SessionId,
    mut reader: PtyReader,
    chunk_size: usize,
    tx: mpsc::Sender<Vec<u8>>,
) -> std::io::Result<()> {
    let session_id = session_id.clone();

    std::thread::Builder::new()
        .name(format!("pty-reader-{}", session_id))
        .spawn(move || {
            let mut buffer = vec![0u8; chunk_size];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        tracing::info!(session_id = %session_id, "PTY EOF - shell exited");
                        break;
                    }
                    Ok(n) => {
                        if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::info!(session_id = %session_id, error = %e, "PTY read ended");
                        break;
                    }
                }
            }
        })?;

    Ok(())
}
