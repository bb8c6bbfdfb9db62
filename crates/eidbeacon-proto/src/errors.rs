//! Error types for wire-format parsing.

use thiserror::Error;

/// Result type alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Structural errors in frames and configuration payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer ended before the layout was complete
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum length for the layout
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Buffer is longer than the layout allows
    #[error("frame too long: expected at most {max} bytes, got {actual}")]
    FrameTooLong {
        /// Maximum length for the layout
        max: usize,
        /// Length received
        actual: usize,
    },

    /// Frame-type byte is not one of UID, URL, TLM or EID
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    /// TLM version byte is neither plain (0x00) nor encrypted (0x01)
    #[error("unsupported TLM version {0:#04x}")]
    UnsupportedTlmVersion(u8),

    /// Slot write length does not match any accepted length for its type
    #[error("invalid write length {length} for frame type {frame_type:#04x}")]
    InvalidWriteLength {
        /// Frame-type byte of the write
        frame_type: u8,
        /// Total write length, frame-type byte included
        length: usize,
    },

    /// Fixed-size configuration value has the wrong length
    #[error("invalid value length: expected {expected} bytes, got {actual}")]
    InvalidValueLength {
        /// Required length
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// URL cannot be expressed in Eddystone-URL compression
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ProtocolError {
    /// Returns true if the error came from a length check rather than an
    /// unrecognised field value.
    pub fn is_length_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::FrameTooLong { .. }
                | Self::InvalidWriteLength { .. }
                | Self::InvalidValueLength { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_lengths() {
        let err = ProtocolError::InvalidWriteLength { frame_type: 0x00, length: 16 };
        assert_eq!(err.to_string(), "invalid write length 16 for frame type 0x00");
    }

    #[test]
    fn length_errors_are_classified() {
        assert!(ProtocolError::FrameTooShort { expected: 20, actual: 3 }.is_length_error());
        assert!(!ProtocolError::UnknownFrameType(0x40).is_length_error());
        assert!(!ProtocolError::UnsupportedTlmVersion(2).is_length_error());
    }
}
