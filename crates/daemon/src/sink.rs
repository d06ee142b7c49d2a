//! Outbound packet delivery.
//!
//! The daemon never talks to the transport directly. Output frames and close
//! notifications are handed to a [`PacketSink`], already addressed with the
//! correlation context of the session they belong to.

use std::future::Future;

use protocol::Packet;
use tokio::sync::mpsc;

/// Delivers packets to the remote controller.
///
/// Delivery is best effort: a packet for a controller that has gone away is
/// dropped without error.
pub trait PacketSink: Send + Sync + 'static {
    /// Hands a packet to the transport.
    ///
    /// Bridge tasks await this future, so a sink that waits for capacity
    /// slows the PTY reader down instead of buffering without bound.
    fn deliver(&self, packet: Packet) -> impl Future<Output = ()> + Send;
}

impl PacketSink for mpsc::Sender<Packet> {
    async fn deliver(&self, packet: Packet) {
        if let Err(e) = self.send(packet).await {
            tracing::trace!(act = %e.0.act, "Outbound channel closed, dropping packet");
        }
    }
}

impl PacketSink for mpsc::UnboundedSender<Packet> {
    async fn deliver(&self, packet: Packet) {
        if let Err(e) = self.send(packet) {
            tracing::trace!(act = %e.0.act, "Outbound channel closed, dropping packet");
        }
    }
}
