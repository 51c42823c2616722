//! Error types for stm8bsl.

use std::io;
use thiserror::Error;

use crate::target::SessionState;

/// Result type for stm8bsl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stm8bsl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Port is not open, was closed, or refused part of a frame.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Fewer bytes than expected arrived within the response window.
    #[error("Timeout during {stage}: expected {expected} byte(s), received {received}")]
    Timeout {
        /// Protocol stage that was waiting.
        stage: String,
        /// Number of bytes the stage expects.
        expected: usize,
        /// Number of bytes actually received.
        received: usize,
    },

    /// Device answered with an unexpected byte value.
    #[error("Protocol violation during {stage}: expected {expected:#04x}, got {actual:#04x}")]
    ProtocolViolation {
        /// Protocol stage that failed.
        stage: String,
        /// Expected byte value.
        expected: u8,
        /// Received byte value.
        actual: u8,
    },

    /// No flash-size probe address was readable.
    #[error("Cannot identify device: no flash size probe succeeded")]
    DeviceNotFound,

    /// Synchronization handshake retries exhausted.
    #[error("Synchronization failed after {attempts} attempts{}", fmt_last_response(.last_response))]
    SyncFailed {
        /// Number of SYNC bytes sent.
        attempts: u32,
        /// Last byte received, if any arrived.
        last_response: Option<u8>,
    },

    /// Operation is not allowed in the current session state.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Requested operation.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// Address or range lies outside what the device or protocol can address.
    #[error("Address range 0x{address:06X}+{length} is out of range")]
    AddressOutOfRange {
        /// Start address.
        address: u32,
        /// Length of the range in bytes.
        length: u32,
    },

    /// Memory image file is malformed or of an unknown format.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Caller requested cancellation between chunks.
    #[error("Operation interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn fmt_last_response(last: &Option<u8>) -> String {
    match last {
        Some(byte) => format!(" (last response {byte:#04x})"),
        None => " (no response)".to_string(),
    }
}

impl Error {
    pub(crate) fn timeout(stage: impl Into<String>, expected: usize, received: usize) -> Self {
        Self::Timeout {
            stage: stage.into(),
            expected,
            received,
        }
    }

    pub(crate) fn violation(stage: impl Into<String>, expected: u8, actual: u8) -> Self {
        Self::ProtocolViolation {
            stage: stage.into(),
            expected,
            actual,
        }
    }

    /// Whether this error leaves the link desynchronized.
    ///
    /// Image, configuration, and state errors are raised before any byte is
    /// exchanged, and interruption only happens between chunks, so none of
    /// them fail the session.
    pub fn is_link_failure(&self) -> bool {
        !matches!(
            self,
            Self::InvalidState { .. }
                | Self::AddressOutOfRange { .. }
                | Self::InvalidImage(_)
                | Self::Interrupted
                | Self::Config(_)
        )
    }
}
