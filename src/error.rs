//! # Error Types
//!
//! Error handling for the device protocol engine.
//!
//! Every failure the engine can observe is a variant of [`ProtocolError`]. The
//! variants fall into a few groups with different dispositions:
//!
//! ## Error Categories
//! - **Framing**: `MalformedFrame`, `FrameTooLarge` (fatal to the connection)
//! - **Message codec**: `UnknownCallType`, `DecodeError`, `EncodeError`, `StringTooLong`
//!   (message dropped; aborts registration when it happens there)
//! - **Value codecs**: `UnknownChannelType`, `UnsupportedConfigField`
//! - **Session**: `AuthorizationFailed`, `NotAuthorized`, `CommunicationError`
//! - **Ambient**: I/O, configuration and TLS failures
//!
//! ## Example Usage
//! ```rust
//! use supla_server_core::error::{ProtocolError, Result};
//!
//! fn check_width(value: &str, width: usize) -> Result<()> {
//!     if value.len() > width {
//!         return Err(ProtocolError::StringTooLong { len: value.len(), max: width });
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_width("none", 33).is_ok());
//! ```

use std::io;
use thiserror::Error;

use crate::protocol::device_config::DecodedDeviceConfig;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_MISSING_TRAILER: &str = "closing sentinel missing after payload";
    pub const ERR_LENGTH_MISMATCH: &str = "payload length does not match declared length";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_WRITER_RELEASED: &str = "Writer already released";
    pub const ERR_LIVENESS_BREACH: &str = "Device stopped sending messages";

    /// Session errors
    pub const ERR_NOT_REGISTERED: &str = "Device is not registered";
    pub const ERR_ALREADY_DISPOSED: &str = "Session already disposed";

    /// Codec errors
    pub const ERR_SHORT_PAYLOAD: &str = "payload ended before the structure was complete";
    pub const ERR_TRAILING_BYTES: &str = "payload has trailing bytes";
}

/// ProtocolError is the primary error type for all engine operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("Frame too large: {declared} bytes (limit {limit})")]
    FrameTooLarge { declared: usize, limit: usize },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown call type: {0}")]
    UnknownCallType(u32),

    #[error("Decode error in {context}: {reason}")]
    DecodeError {
        context: &'static str,
        reason: String,
    },

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("String of {len} bytes exceeds field width {max}")]
    StringTooLong { len: usize, max: usize },

    #[error("Unknown channel type: {0}")]
    UnknownChannelType(i32),

    #[error("Unsupported device config field bit {bit}")]
    UnsupportedConfigField {
        bit: u8,
        partial: Box<DecodedDeviceConfig>,
    },

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TLS error: {0}")]
    TlsError(String),
}

impl ProtocolError {
    /// Shorthand for a structural decode failure.
    pub fn decode(context: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::DecodeError {
            context,
            reason: reason.into(),
        }
    }

    /// Whether this error must tear the connection down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::MalformedFrame(_)
                | ProtocolError::FrameTooLarge { .. }
                | ProtocolError::ConnectionClosed
                | ProtocolError::CommunicationError(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
