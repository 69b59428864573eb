//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding TLV frames and bundles.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than the smallest valid frame
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    /// Trailing CRC does not match the frame contents
    #[error("crc mismatch")]
    CrcMismatch,

    /// First byte is not the protocol sentinel
    #[error("invalid protocol id 0x{0:02x}")]
    InvalidProtocolId(u8),

    /// Declared value length runs past the end of the buffer
    #[error("declared length {declared} exceeds frame of {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    /// Value does not fit in a single frame
    #[error("value of {0} bytes exceeds frame capacity")]
    ValueTooLong(usize),

    /// Value is shorter than the structure decoded from it
    #[error("value too short: expected {expected} bytes, got {actual}")]
    ValueTooShort { expected: usize, actual: usize },
}
