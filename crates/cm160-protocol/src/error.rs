//! Protocol error types.

use thiserror::Error;

use crate::constants::SHORT_HISTORY_LEN;
use crate::decode::DataKind;

/// Errors raised while framing or decoding the CM160 byte stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A data frame whose trailing byte does not match the sum of the others.
    #[error("{kind} frame checksum mismatch: frame carries 0x{expected:02X}, computed 0x{actual:02X}")]
    ChecksumMismatch {
        /// Type of the data frame.
        kind: DataKind,
        /// Checksum byte carried in the frame.
        expected: u8,
        /// Checksum computed over the first ten bytes.
        actual: u8,
    },

    /// The window does not start a frame we know.
    #[error("unrecognized frame starting with 0x{marker:02X}")]
    UnrecognizedFrame {
        /// First byte of the window.
        marker: u8,
    },

    /// Appending would exceed the receive buffer capacity.
    #[error("receive buffer overflow: capacity {capacity} bytes, needed {attempted}")]
    BufferOverflow {
        /// Buffer capacity.
        capacity: usize,
        /// Length the buffer would have reached.
        attempted: usize,
    },
}

impl ProtocolError {
    /// Number of bytes the frame buffer should drop after this error.
    ///
    /// `0` asks for a one byte resync. A history frame with a bad checksum is
    /// taken to be a record with its minute byte missing and is skipped whole.
    pub fn consumed(&self) -> usize {
        match self {
            ProtocolError::ChecksumMismatch {
                kind: DataKind::History,
                ..
            } => SHORT_HISTORY_LEN,
            ProtocolError::ChecksumMismatch { .. } | ProtocolError::UnrecognizedFrame { .. } => 0,
            ProtocolError::BufferOverflow { .. } => 0,
        }
    }

    /// Whether the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::BufferOverflow { .. })
    }

    /// Short label used for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ProtocolError::ChecksumMismatch { .. } => "checksum",
            ProtocolError::UnrecognizedFrame { .. } => "unrecognized",
            ProtocolError::BufferOverflow { .. } => "overflow",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumed_lengths() {
        let live = ProtocolError::ChecksumMismatch {
            kind: DataKind::Live,
            expected: 0x10,
            actual: 0x11,
        };
        let history = ProtocolError::ChecksumMismatch {
            kind: DataKind::History,
            expected: 0x10,
            actual: 0x11,
        };
        assert_eq!(live.consumed(), 0);
        assert_eq!(history.consumed(), 10);
        assert_eq!(ProtocolError::UnrecognizedFrame { marker: 0x00 }.consumed(), 0);
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::ChecksumMismatch {
            kind: DataKind::Live,
            expected: 0xAB,
            actual: 0x01,
        };
        let text = err.to_string();
        assert!(text.contains("LIVE"));
        assert!(text.contains("0xAB"));

        let err = ProtocolError::BufferOverflow {
            capacity: 4096,
            attempted: 4100,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("4096"));
    }
}
