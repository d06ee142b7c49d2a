//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering request validation and packet encoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    // Request validation errors
    /// The packet carries no data, or a required payload field is absent or
    /// has the wrong type.
    #[error("request data not found: {0}")]
    DataNotFound(&'static str),

    /// A payload field is present but its value cannot be used.
    #[error("request data invalid: {0}")]
    DataInvalid(String),

    /// The `terminal` identifier is absent, not a string, or empty.
    #[error("terminal identifier missing or invalid")]
    TerminalIdMissing,

    // Serialization errors
    /// Failed to serialize or deserialize a packet.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for ProtocolError {
    fn from(err: hex::FromHexError) -> Self {
        ProtocolError::DataInvalid(format!("input is not valid hex: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProtocolError::DataNotFound("input").to_string(),
            "request data not found: input"
        );
        assert_eq!(
            ProtocolError::TerminalIdMissing.to_string(),
            "terminal identifier missing or invalid"
        );
    }

    #[test]
    fn test_from_hex_error() {
        let err: ProtocolError = hex::decode("zz").unwrap_err().into();
        assert!(matches!(err, ProtocolError::DataInvalid(_)));
    }

    #[test]
    fn test_from_json_error() {
        let err: ProtocolError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ProtocolError::Serialization(_)));
    }
}
