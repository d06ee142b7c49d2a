//! Idle-session reaper.
//!
//! A periodic sweep evicts sessions that have seen no input or output for
//! longer than the idle timeout, and drops entries whose PTY is already
//! closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::manager::SessionManager;
use crate::sink::PacketSink;

impl<S: PacketSink> SessionManager<S> {
    /// Runs one sweep at the current clock time.
    ///
    /// Returns the number of entries removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now()).await
    }

    /// Runs one sweep as if the clock read `now`.
    pub async fn sweep_at(&self, now: u64) -> usize {
        let idle_timeout = self.reaper.idle_timeout_secs;
        let mut queue = Vec::new();

        // Snapshot first so no map guard is held while PTYs are closed.
        for session in self.table.snapshot() {
            if session.is_closed() {
                queue.push(session);
                continue;
            }

            let idle = session.idle_secs(now);
            if idle > idle_timeout {
                tracing::info!(
                    session_id = %session.id(),
                    idle_secs = idle,
                    "Evicting idle session"
                );
                session.pty().close().await;
                queue.push(session);
            }
        }

        let mut removed = 0;
        for session in &queue {
            if self.table.remove_same(session) {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, remaining = self.table.len(), "Reaper sweep finished");
        }
        removed
    }

    /// Starts the periodic sweep.
    ///
    /// The task runs until [`SessionManager::shutdown`] is called.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.reaper.interval_secs);
        let shutdown = self.shutdown.clone();

        tracing::debug!(
            interval_secs = self.reaper.interval_secs,
            idle_timeout_secs = self.reaper.idle_timeout_secs,
            "Starting reaper"
        );

        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Reaper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.sweep().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use protocol::messages::act;
    use protocol::{
        CorrelationContext, CreateTerminal, InputTerminal, Packet, PingTerminal,
        SESSION_CLOSED_MSG,
    };
    use tokio::sync::mpsc;

    use crate::config::Config;
    use crate::session::manager::SessionManager;

    type TestManager = SessionManager<mpsc::UnboundedSender<Packet>>;

    fn test_manager(config: &Config) -> (TestManager, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionManager::new(config, Arc::new(tx)), rx)
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.session.shell_candidates = vec!["/bin/sh".to_string()];
        config
    }

    async fn create(manager: &TestManager, id: &str) {
        manager
            .create(
                CreateTerminal {
                    terminal: id.to_string(),
                },
                CorrelationContext::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_session() {
        let (manager, mut rx) = test_manager(&test_config());
        create(&manager, "idle").await;

        let session = manager.session("idle").unwrap();
        let now = session.last_activity() + 181;

        // The bridge may win the race to remove the entry, so only the end
        // state is checked.
        manager.sweep_at(now).await;
        assert!(!manager.exists("idle"));
        assert!(session.is_closed());

        manager
            .input(
                InputTerminal {
                    terminal: "idle".to_string(),
                    input: b"ls\n".to_vec(),
                },
                &CorrelationContext::default(),
            )
            .await;

        let mut notified = false;
        while let Ok(Some(packet)) =
            tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await
        {
            if packet.act == act::QUIT && packet.msg.as_deref() == Some(SESSION_CLOSED_MSG) {
                notified = true;
                break;
            }
        }
        assert!(notified);
    }

    #[tokio::test]
    async fn test_sweep_keeps_session_at_threshold() {
        let (manager, _rx) = test_manager(&test_config());
        create(&manager, "busy").await;

        let session = manager.session("busy").unwrap();
        let now = session.last_activity() + 180;

        assert_eq!(manager.sweep_at(now).await, 0);
        assert!(manager.exists("busy"));
        assert!(!session.is_closed());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_activity_prevents_eviction() {
        let (manager, _rx) = test_manager(&test_config());
        create(&manager, "active").await;

        let session = manager.session("active").unwrap();
        let created = session.last_activity();

        // Traffic observed 100s after creation keeps the session alive 200s in.
        session.touch(created + 100);
        assert_eq!(manager.sweep_at(created + 200).await, 0);
        assert!(manager.exists("active"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_ping_prevents_eviction() {
        let (manager, _rx) = test_manager(&test_config());
        create(&manager, "pinged").await;

        let session = manager.session("pinged").unwrap();
        manager
            .ping(
                PingTerminal {
                    terminal: "pinged".to_string(),
                },
                &CorrelationContext::default(),
            )
            .await;

        assert_eq!(manager.sweep_at(session.last_activity() + 10).await, 0);
        assert!(manager.exists("pinged"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_removes_closed_entries() {
        let (manager, _rx) = test_manager(&test_config());
        create(&manager, "closed").await;

        let session = manager.session("closed").unwrap();
        session.pty().close().await;
        manager.table().insert(Arc::clone(&session));

        manager.sweep_at(session.last_activity()).await;
        assert!(!manager.exists("closed"));
    }

    #[tokio::test]
    async fn test_sweep_only_evicts_stale_sessions() {
        let mut config = test_config();
        config.reaper.idle_timeout_secs = 60;
        let (manager, _rx) = test_manager(&config);

        create(&manager, "old").await;
        create(&manager, "fresh").await;

        let old = manager.session("old").unwrap();
        let fresh = manager.session("fresh").unwrap();
        let base = old.last_activity().max(fresh.last_activity());
        fresh.touch(base + 30);

        manager.sweep_at(base + 70).await;
        assert!(!manager.exists("old"));
        assert!(old.is_closed());
        assert!(manager.exists("fresh"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_races_with_kill() {
        let (manager, _rx) = test_manager(&test_config());
        create(&manager, "contested").await;

        let session = manager.session("contested").unwrap();
        let now = session.last_activity() + 1000;
        let ctx = CorrelationContext::default();

        tokio::join!(
            manager.sweep_at(now),
            manager.kill(
                protocol::KillTerminal {
                    terminal: "contested".to_string(),
                },
                &ctx,
            ),
        );

        assert!(!manager.exists("contested"));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_reaper_task_runs_and_stops() {
        let mut config = test_config();
        config.reaper.interval_secs = 1;
        let (manager, _rx) = test_manager(&config);
        let manager = Arc::new(manager);

        let handle = manager.start_reaper();
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        assert!(!handle.is_finished());

        manager.shutdown().await;
        assert!(handle.await.is_ok());
    }
}
