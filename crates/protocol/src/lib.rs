//! # ptylink Protocol Library
//!
//! This crate provides the wire model shared by the ptylink daemon and the
//! transport that carries its packets to a remote controller.
//!
//! ## Overview
//!
//! - **Packets**: the JSON envelope `{act, event, msg, data}` and the
//!   correlation context used to address asynchronous replies
//! - **Payload Codec**: hex encoding of raw terminal bytes
//! - **Messages**: statically validated terminal requests and the outbound
//!   `outputTerminal` / `quitTerminal` notifications
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Packet, TerminalRequest};
//! use protocol::messages::act;
//!
//! let packet = Packet::new(act::INPUT)
//!     .with_event("evt-1")
//!     .with_field("terminal", "abc")
//!     .with_field("input", "6c730a");
//!
//! match TerminalRequest::from_packet(&packet).unwrap() {
//!     Some(TerminalRequest::Input(req)) => assert_eq!(req.input, b"ls\n"),
//!     other => panic!("unexpected request: {:?}", other),
//! }
//! ```
//!
//! ## Modules
//!
//! - [`packet`]: Packet envelope and correlation context
//! - [`codec`]: Hex payload codec
//! - [`messages`]: Terminal requests and notifications
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod messages;
pub mod packet;

pub use codec::{decode_payload, encode_payload};
pub use error::{ProtocolError, Result};
pub use messages::{
    output_frame, quit_notice, CreateTerminal, InputTerminal, KillTerminal, PingTerminal,
    ResizeTerminal, TerminalRequest, TerminalSize, SESSION_CLOSED_MSG,
};
pub use packet::{CorrelationContext, Packet};
