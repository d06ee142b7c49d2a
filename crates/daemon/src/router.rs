//! Packet router for dispatching inbound packets to the session manager.
//!
//! The router validates each packet into a typed request and calls the
//! matching control handler. Validation and spawn errors are returned to the
//! caller; they are never sent to the remote peer.

use std::sync::Arc;

use protocol::{CorrelationContext, Packet, ProtocolError, TerminalRequest};
use tracing::debug;

use crate::session::{SessionError, SessionManager};
use crate::sink::PacketSink;

/// Result type for router operations.
pub type RouterResult = Result<(), RouterError>;

/// Errors that can occur during packet routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The packet failed validation.
    #[error("invalid request: {0}")]
    Request(#[from] ProtocolError),

    /// Session creation failed.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// No handler exists for the action.
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// Routes inbound packets to the session manager.
pub struct Router<S: PacketSink> {
    sessions: Arc<SessionManager<S>>,
}

impl<S: PacketSink> Router<S> {
    /// Create a new router over the given session manager.
    pub fn new(sessions: Arc<SessionManager<S>>) -> Self {
        Self { sessions }
    }

    /// Returns the session manager.
    pub fn sessions(&self) -> &Arc<SessionManager<S>> {
        &self.sessions
    }

    /// Route a packet to the appropriate handler.
    pub async fn route(&self, packet: Packet) -> RouterResult {
        debug!(act = %packet.act, event = %packet.event, "Routing packet");

        let request = TerminalRequest::from_packet(&packet)?
            .ok_or_else(|| RouterError::UnknownAction(packet.act.clone()))?;
        let context = CorrelationContext::of(&packet);

        match request {
            TerminalRequest::Create(req) => self.sessions.create(req, context).await?,
            TerminalRequest::Input(req) => self.sessions.input(req, &context).await,
            TerminalRequest::Resize(req) => self.sessions.resize(req, &context).await,
            TerminalRequest::Kill(req) => self.sessions.kill(req, &context).await,
            TerminalRequest::Ping(req) => self.sessions.ping(req, &context).await,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use protocol::messages::act;
    use tokio::sync::mpsc;

    fn test_router() -> (
        Router<mpsc::UnboundedSender<Packet>>,
        mpsc::UnboundedReceiver<Packet>,
    ) {
        let mut config = Config::default();
        config.session.shell_candidates = vec!["/bin/sh".to_string()];
        let (tx, rx) = mpsc::unbounded_channel();
        let sessions = Arc::new(SessionManager::new(&config, Arc::new(tx)));
        (Router::new(sessions), rx)
    }

    #[tokio::test]
    async fn test_route_unknown_action() {
        let (router, _rx) = test_router();

        let result = router.route(Packet::new("listFiles")).await;
        assert!(matches!(result, Err(RouterError::UnknownAction(name)) if name == "listFiles"));
    }

    #[tokio::test]
    async fn test_route_invalid_request() {
        let (router, _rx) = test_router();

        let result = router.route(Packet::new(act::INIT)).await;
        assert!(matches!(
            result,
            Err(RouterError::Request(ProtocolError::TerminalIdMissing))
        ));
        assert_eq!(router.sessions().count(), 0);
    }

    #[tokio::test]
    async fn test_route_create_and_kill() {
        let (router, _rx) = test_router();

        router
            .route(Packet::new(act::INIT).with_field("terminal", "routed"))
            .await
            .unwrap();
        assert!(router.sessions().exists("routed"));

        router
            .route(Packet::new(act::KILL).with_field("terminal", "routed"))
            .await
            .unwrap();
        assert!(!router.sessions().exists("routed"));
    }

    #[tokio::test]
    async fn test_route_missing_session_is_not_an_error() {
        let (router, mut rx) = test_router();

        let result = router
            .route(
                Packet::new(act::RESIZE)
                    .with_event("evt")
                    .with_field("terminal", "ghost")
                    .with_field("width", 80)
                    .with_field("height", 24),
            )
            .await;
        assert!(result.is_ok());

        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.act, act::QUIT);
        assert_eq!(packet.event, "evt");
    }
}
