//! Packet envelope exchanged with the remote controller.
//!
//! Every inbound control request and every outbound notification travels as a
//! [`Packet`]: an action name, a correlation token, an optional message and an
//! optional JSON object of fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// JSON envelope carried by the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    /// Action name, e.g. `inputTerminal`.
    pub act: String,

    /// Correlation token used to route replies back to the controller.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event: String,

    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    /// Request or notification fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Packet {
    /// Creates a packet with the given action and no fields.
    pub fn new(act: impl Into<String>) -> Self {
        Self {
            act: act.into(),
            ..Default::default()
        }
    }

    /// Sets the correlation token.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    /// Sets the human-readable message.
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Adds a field to the data object, creating it if needed.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Returns a field from the data object.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }

    /// Parses a packet from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the packet to a single-line JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Addressing information retained from the request that created a session.
///
/// Asynchronous notifications (output frames, close notices) are stamped with
/// this context so the controller can match them to the original conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationContext {
    /// Correlation token of the originating packet.
    pub event: String,
    /// Action of the originating packet.
    pub act: String,
}

impl CorrelationContext {
    /// Captures the context of an inbound packet.
    pub fn of(packet: &Packet) -> Self {
        Self {
            event: packet.event.clone(),
            act: packet.act.clone(),
        }
    }

    /// Stamps an outbound packet so it is routed back to this context.
    pub fn address(&self, mut packet: Packet) -> Packet {
        packet.event = self.event.clone();
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_packet_from_json() {
        let packet = Packet::from_json(
            r#"{"act":"inputTerminal","event":"evt-1","data":{"terminal":"abc","input":"6c730a"}}"#,
        )
        .unwrap();

        assert_eq!(packet.act, "inputTerminal");
        assert_eq!(packet.event, "evt-1");
        assert_eq!(packet.field("terminal"), Some(&json!("abc")));
        assert_eq!(packet.field("input"), Some(&json!("6c730a")));
        assert!(packet.msg.is_none());
    }

    #[test]
    fn test_packet_minimal_json() {
        let packet = Packet::from_json(r#"{"act":"killTerminal"}"#).unwrap();
        assert_eq!(packet.act, "killTerminal");
        assert!(packet.event.is_empty());
        assert!(packet.data.is_none());
        assert!(packet.field("terminal").is_none());
    }

    #[test]
    fn test_packet_to_json_omits_empty_fields() {
        let json = Packet::new("quitTerminal").to_json().unwrap();
        assert_eq!(json, r#"{"act":"quitTerminal"}"#);
    }

    #[test]
    fn test_packet_builder() {
        let packet = Packet::new("outputTerminal")
            .with_event("evt-2")
            .with_msg("hello")
            .with_field("output", "6869");

        assert_eq!(packet.event, "evt-2");
        assert_eq!(packet.msg.as_deref(), Some("hello"));
        assert_eq!(packet.field("output"), Some(&json!("6869")));
    }

    #[test]
    fn test_packet_invalid_json() {
        assert!(Packet::from_json("not json").is_err());
        assert!(Packet::from_json(r#"{"event":"x"}"#).is_err());
    }

    #[test]
    fn test_correlation_context_addresses_packet() {
        let request = Packet::new("initTerminal").with_event("evt-42");
        let context = CorrelationContext::of(&request);

        assert_eq!(context.act, "initTerminal");

        let reply = context.address(Packet::new("quitTerminal").with_event("other"));
        assert_eq!(reply.event, "evt-42");
        assert_eq!(reply.act, "quitTerminal");
    }
}
