//! ptylink Daemon
//!
//! Headless service that bridges remote terminal requests to local shells.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::protocol::{self, Packet};
use daemon::{resolve_shell, Router, SessionManager};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Capacity of the outbound packet channel.
const OUTBOUND_CAPACITY: usize = 256;

/// How long to wait for queued packets to reach stdout after shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// ptylink Daemon - remote pseudo-terminal bridge.
#[derive(Parser, Debug)]
#[command(name = "ptylink-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Serve terminal requests read as JSON lines from stdin
    Serve,

    /// Print the effective configuration
    Config,

    /// Print the shell new sessions would run
    Shell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    init_tracing(cli.verbose, &config.daemon.log_level);

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Serve => run_serve(config).await?,
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
        Commands::Shell => {
            println!(
                "{}",
                resolve_shell(
                    &config.session.shell_candidates,
                    &config.session.fallback_shell
                )
            );
        }
    }

    Ok(())
}

/// Initialize tracing on stderr.
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
fn init_tracing(verbose: bool, log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { log_level })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the daemon over stdin/stdout until input ends or a signal arrives.
async fn run_serve(config: Config) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel::<Packet>(OUTBOUND_CAPACITY);
    let sessions = Arc::new(SessionManager::new(&config, Arc::new(tx)));
    sessions.start_reaper();

    let router = Router::new(Arc::clone(&sessions));
    let writer = tokio::spawn(write_packets(rx));

    tracing::info!(
        shell = %resolve_shell(&config.session.shell_candidates, &config.session.fallback_shell),
        max_sessions = config.session.max_sessions,
        "ptylink daemon serving on stdio"
    );

    let result = read_packets(&router).await;

    // Sessions are torn down even if reading failed.
    sessions.shutdown().await;
    drop(router);
    drop(sessions);

    match tokio::time::timeout(FLUSH_TIMEOUT, writer).await {
        Ok(joined) => joined.context("Output writer panicked")??,
        Err(_) => tracing::warn!("Timed out flushing outbound packets"),
    }

    result
}

/// Route packets from stdin until EOF or a shutdown signal.
async fn read_packets<S: daemon::PacketSink>(router: &Router<S>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to register signal handlers")?;
                break;
            }
            line = lines.next_line() => {
                match line.context("Failed to read from stdin")? {
                    Some(line) => handle_line(router, &line).await,
                    None => {
                        tracing::info!("Input closed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Parse and route a single input line. Failures are logged, never fatal.
async fn handle_line<S: daemon::PacketSink>(router: &Router<S>, line: &str) {
    let packet = match parse_line(line) {
        Some(Ok(packet)) => packet,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Discarding malformed packet");
            return;
        }
        None => return,
    };

    let act = packet.act.clone();
    if let Err(e) = router.route(packet).await {
        tracing::warn!(act = %act, error = %e, "Request rejected");
    }
}

/// Parse a JSON line into a packet. Blank lines yield `None`.
fn parse_line(line: &str) -> Option<protocol::Result<Packet>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(Packet::from_json(line))
}

/// Write outbound packets to stdout as JSON lines.
async fn write_packets(mut rx: mpsc::Receiver<Packet>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();

    while let Some(packet) = rx.recv().await {
        let mut line = packet.to_json()?;
        line.push('\n');
        stdout
            .write_all(line.as_bytes())
            .await
            .context("Failed to write to stdout")?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}
