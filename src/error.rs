//! Error types for the section codec.

use std::backtrace::Backtrace;
use std::io;
use thiserror::Error;

/// Errors produced by the encoder, the decoder and the supporting glue.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be serialized by the JSON marshaler.
    #[error("Failed to marshal value: {0}")]
    Marshal(#[from] serde_json::Error),

    /// A value could not be serialized by a custom marshaler.
    #[error("Failed to marshal value: {0}")]
    MarshalWith(String),

    /// Malformed or unrecognized frame sequence. Fatal to the decode session.
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        /// Backtrace captured where the violation was detected (may be empty
        /// unless `RUST_BACKTRACE` is set).
        trace: String,
    },

    /// Section path cannot be represented on the wire.
    #[error("Invalid section path: {0}")]
    InvalidPath(String),

    /// `send_element` was called while no Array or Map section was open.
    #[error("No array or map section is open")]
    NoOpenSection,

    /// Frame exceeds the configured size limit.
    #[error("Frame size {size} exceeds maximum allowed size {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The other end of a handoff queue has gone away.
    #[error("Channel closed")]
    Closed,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Build a protocol error, capturing a backtrace for diagnostics.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            trace: Backtrace::capture().to_string(),
        }
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    pub fn is_marshal(&self) -> bool {
        matches!(self, Self::Marshal(_) | Self::MarshalWith(_))
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = CodecError::protocol("unknown marker 0xff");
        assert!(err.is_protocol());
        assert_eq!(err.to_string(), "Protocol error: unknown marker 0xff");
    }

    #[test]
    fn test_marshal_error_from_serde() {
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: CodecError = serde_err.into();
        assert!(err.is_marshal());
        assert!(!err.is_protocol());
    }

    #[test]
    fn test_frame_too_large_display() {
        let err = CodecError::FrameTooLarge { size: 10, max: 4 };
        assert_eq!(
            err.to_string(),
            "Frame size 10 exceeds maximum allowed size 4"
        );
    }
}
