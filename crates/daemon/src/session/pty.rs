//! PTY handle.
//!
//! Wraps one shell process running on a pseudo-terminal. The handle owns the
//! write side, the master (for resizing) and the child process; the read side
//! is handed out once at spawn time so exactly one bridge task can own it.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use protocol::TerminalSize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Time the shell's process groups get between SIGHUP and SIGKILL.
const HANGUP_GRACE: Duration = Duration::from_millis(50);

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to spawn the PTY or the shell.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// The session table is full.
    #[error("session limit reached ({0} sessions)")]
    LimitReached(usize),

    /// The PTY has already been closed.
    #[error("PTY already closed")]
    Closed,

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking reader for PTY output.
pub type PtyReader = Box<dyn Read + Send>;

type ShellProcess = Box<dyn Child + Send + Sync>;

/// A shell process attached to a pseudo-terminal.
pub struct Pty {
    /// The PTY master, dropped on close.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,

    /// The input side of the PTY, dropped on close.
    writer: Mutex<Option<Box<dyn Write + Send>>>,

    /// The shell process, taken on close.
    child: Mutex<Option<ShellProcess>>,

    /// One-shot close guard.
    closed: AtomicBool,

    /// Fired by the first close so the output reader can stop waiting.
    close_token: CancellationToken,

    /// Process ID of the shell.
    pid: Option<u32>,
}

impl Pty {
    /// Opens a PTY of the given size and spawns `shell` on it.
    ///
    /// The shell starts in the daemon's working directory. Returns the
    /// handle and the output reader. Nothing is left running if any step
    /// fails.
    pub fn spawn(shell: &str, size: TerminalSize) -> Result<(Self, PtyReader), SessionError> {
        let cwd = std::env::current_dir()?;
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(size))
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(cwd);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        // Only the child keeps the slave open, so its exit ends the output stream.
        drop(pair.slave);

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));

        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::SpawnFailed(e.to_string()));
            }
        };

        let pid = child.process_id();

        let pty = Pty {
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
            pid,
        };

        Ok((pty, reader))
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns whether the PTY has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns a token that is cancelled as soon as the PTY is closed.
    pub fn close_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Writes data to the shell's input.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(SessionError::Closed)?;

        writer
            .write_all(data)
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        Ok(())
    }

    /// Applies new terminal dimensions.
    pub async fn resize(&self, size: TerminalSize) -> Result<(), SessionError> {
        let master = self.master.lock().await;
        let master = master.as_ref().ok_or(SessionError::Closed)?;

        master
            .resize(pty_size(size))
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))
    }

    /// Kills the shell and releases the PTY.
    ///
    /// Safe to call any number of times from any task; only the first call
    /// does the work. Returns `true` for that first call.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.close_token.cancel();
        self.writer.lock().await.take();

        let master = self.master.lock().await.take();
        let foreground = master.as_ref().and_then(|master| master.process_group_leader());
        let child = self.child.lock().await.take();
        let pid = self.pid;

        // Signalling and reaping sleep, so they run off the async workers.
        let reaped = tokio::task::spawn_blocking(move || {
            if let Some(child) = child {
                terminate(child, foreground);
            }
            drop(master);
        })
        .await;

        if let Err(e) = reaped {
            tracing::warn!(pid = ?pid, error = %e, "Shell teardown task failed");
        }
        true
    }
}

/// Hangs up and then kills the shell's process group and the terminal's
/// foreground group, then reaps the shell.
fn terminate(mut child: ShellProcess, foreground: Option<i32>) {
    let pid = child.process_id();

    let mut groups: Vec<Pid> = Vec::with_capacity(2);
    for raw in pid.and_then(|pid| i32::try_from(pid).ok()).into_iter().chain(foreground) {
        let group = Pid::from_raw(raw);
        if raw > 0 && !groups.contains(&group) {
            groups.push(group);
        }
    }

    if groups.is_empty() {
        if let Err(e) = child.kill() {
            tracing::debug!(pid = ?pid, error = %e, "Failed to kill shell");
        }
    } else {
        signal_groups(&groups, Signal::SIGHUP);
        std::thread::sleep(HANGUP_GRACE);
        signal_groups(&groups, Signal::SIGKILL);
    }

    match child.wait() {
        Ok(status) => tracing::debug!(pid = ?pid, code = status.exit_code(), "Shell exited"),
        Err(e) => tracing::debug!(pid = ?pid, error = %e, "Failed to reap shell"),
    }
}

fn signal_groups(groups: &[Pid], signal: Signal) {
    for &group in groups {
        // ESRCH just means the group is already gone.
        if let Err(e) = killpg(group, signal) {
            tracing::trace!(pgid = %group, signal = ?signal, error = %e, "killpg failed");
        }
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.height,
        cols: size.width,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SIZE: TerminalSize = TerminalSize {
        width: 80,
        height: 24,
    };

    /// Reads from the PTY on a blocking thread until `needle` shows up.
    async fn read_until(reader: PtyReader, needle: &'static str) -> bool {
        let task = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut seen = Vec::new();
            let mut buffer = [0u8; 512];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) | Err(_) => return false,
                    Ok(n) => {
                        seen.extend_from_slice(&buffer[..n]);
                        if String::from_utf8_lossy(&seen).contains(needle) {
                            return true;
                        }
                    }
                }
            }
        });
        matches!(
            tokio::time::timeout(Duration::from_secs(5), task).await,
            Ok(Ok(true))
        )
    }

    #[tokio::test]
    async fn test_pty_spawn() {
        let result = Pty::spawn("/bin/sh", SIZE);
        assert!(result.is_ok(), "Failed to spawn PTY: {:?}", result.err());

        let (pty, _reader) = result.unwrap();
        assert!(!pty.is_closed());
        assert!(pty.pid().is_some());

        pty.close().await;
    }

    #[tokio::test]
    async fn test_pty_spawn_missing_program() {
        let result = Pty::spawn("definitely-not-a-shell-8c1f", SIZE);
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_pty_write_and_read() {
        let (pty, reader) = Pty::spawn("/bin/sh", SIZE).unwrap();

        pty.write(b"echo pty_marker_$((40+2))\n").await.unwrap();
        assert!(read_until(reader, "pty_marker_42").await);

        pty.close().await;
    }

    #[tokio::test]
    async fn test_pty_resize() {
        let (pty, reader) = Pty::spawn("/bin/sh", SIZE).unwrap();

        pty.resize(TerminalSize {
            width: 120,
            height: 40,
        })
        .await
        .unwrap();
        pty.write(b"stty size\n").await.unwrap();
        assert!(read_until(reader, "40 120").await);

        pty.close().await;
    }

    #[tokio::test]
    async fn test_pty_close_is_idempotent() {
        let (pty, _reader) = Pty::spawn("/bin/sh", SIZE).unwrap();

        assert!(pty.close().await);
        assert!(pty.is_closed());
        assert!(!pty.close().await);
        assert!(!pty.close().await);
    }

    #[tokio::test]
    async fn test_pty_close_ends_output_stream() {
        let (pty, reader) = Pty::spawn("/bin/sh", SIZE).unwrap();
        pty.close().await;

        let task = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut buffer = [0u8; 512];
            // Drain anything buffered before the shell died.
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) | Err(_) => return true,
                    Ok(_) => continue,
                }
            }
        });
        let ended = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(matches!(ended, Ok(Ok(true))));
    }

    #[tokio::test]
    async fn test_pty_starts_in_current_directory() {
        let (pty, reader) = Pty::spawn("/bin/sh", SIZE).unwrap();

        // Integration and unit tests both run from the crate root.
        pty.write(b"ls\n").await.unwrap();
        assert!(read_until(reader, "Cargo.toml").await);

        pty.close().await;
    }

    #[tokio::test]
    async fn test_pty_close_fires_token() {
        let (pty, _reader) = Pty::spawn("/bin/sh", SIZE).unwrap();
        let token = pty.close_token();
        assert!(!token.is_cancelled());

        pty.close().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_pty_close_with_detached_job() {
        let (pty, _reader) = Pty::spawn("/bin/sh", SIZE).unwrap();
        let token = pty.close_token();

        pty.write(b"sh -c 'trap \"\" HUP; sleep 10' &\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), pty.close()).await;
        assert!(matches!(closed, Ok(true)));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_pty_write_after_close() {
        let (pty, _reader) = Pty::spawn("/bin/sh", SIZE).unwrap();
        pty.close().await;

        assert!(matches!(pty.write(b"hello\n").await, Err(SessionError::Closed)));
        assert!(matches!(pty.resize(SIZE).await, Err(SessionError::Closed)));
    }
}
