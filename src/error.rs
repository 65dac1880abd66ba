//! Error types for the pumpcomm library.

use thiserror::Error;

use crate::protocol::CommandCode;

/// The main error type for pumpcomm operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A message payload could not be decoded.
    #[error("malformed payload for {command}: {reason}")]
    MalformedPayload { command: CommandCode, reason: String },

    /// No message definition is registered for the command code.
    #[error("unknown command {0}")]
    UnknownCommand(CommandCode),

    /// A definition is already registered for the command code.
    #[error("command {0} is already registered")]
    DuplicateRegistration(CommandCode),

    /// Request timed out after all retries.
    #[error("command timed out after {attempts} attempt(s) of {timeout_ms}ms")]
    Timeout { timeout_ms: u64, attempts: u32 },

    /// History data frame arrived out of sequence. Re-issue the history request.
    #[error("history sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u8, got: u8 },

    /// The pump acknowledged the command with a non-zero status.
    #[error("{command} rejected by pump with status 0x{status:02x}")]
    Rejected { command: CommandCode, status: u8 },

    /// Transport reported a link failure.
    #[error("link error: {reason}")]
    Link { reason: String },

    /// Request was cancelled before a reply arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The session task is no longer running.
    #[error("session closed")]
    SessionClosed,

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,
}

impl Error {
    /// Builds a [`Error::MalformedPayload`] for `command`.
    pub(crate) fn malformed(command: CommandCode, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            command,
            reason: reason.into(),
        }
    }

    /// Returns true if re-issuing the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::SequenceGap { .. } | Self::Frame(_)
        )
    }
}

/// Frame-specific errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Declared length cannot hold a command code.
    #[error("invalid frame length {0}")]
    InvalidLength(usize),

    /// Frame payload exceeds what the length field can express.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Checksum in the frame does not match the computed one.
    #[error("checksum mismatch: frame carries 0x{expected:04x}, computed 0x{actual:04x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// Result type alias for pumpcomm operations.
pub type Result<T> = std::result::Result<T, Error>;
