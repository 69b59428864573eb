//! TLV framing for the telemetry protocol
//!
//! ```text
//! +-------------+-----+--------+----------------+-----------+
//! | protocol id | tag | length | value (0..=59) | crc16 LE  |
//! +-------------+-----+--------+----------------+-----------+
//! ```
//!
//! The CRC covers every byte before it. A frame is at most 64 bytes.

use crate::crc;
use crate::error::ProtocolError;
use crate::tags::{TAG_ERROR, TAG_OK};

/// Sentinel carried in the first byte of every frame
pub const PROTOCOL_ID: u8 = 0x15;

/// protocol id + tag + length
pub const HEADER_LEN: usize = 3;

pub const CRC_LEN: usize = 2;

pub const MAX_FRAME_LEN: usize = 64;

pub const MAX_VALUE_LEN: usize = 59;

/// Smallest valid frame: header + empty value + crc
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CRC_LEN;

/// Encode a frame with an arbitrary value
pub fn encode_frame(tag: u8, value: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if value.len() > MAX_VALUE_LEN {
        return Err(ProtocolError::ValueTooLong(value.len()));
    }
    let mut buf = Vec::with_capacity(HEADER_LEN + value.len() + CRC_LEN);
    buf.push(PROTOCOL_ID);
    buf.push(tag);
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
    let sum = crc::crc16(&buf);
    buf.extend_from_slice(&sum.to_le_bytes());
    Ok(buf)
}

fn encode_small(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + value.len());
    buf.push(PROTOCOL_ID);
    buf.push(tag);
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
    crc::append(&buf)
}

/// Read request: `[0x15, tag, 0x00] + crc`
pub fn read_request(tag: u8) -> Vec<u8> {
    encode_small(tag, &[])
}

/// Float write request: `[0x15, tag, 0x04, f32 LE] + crc`
pub fn write_f32_request(tag: u8, value: f32) -> Vec<u8> {
    encode_small(tag, &value.to_le_bytes())
}

/// Byte write request: `[0x15, tag, 0x01, value] + crc`
pub fn write_u8_request(tag: u8, value: u8) -> Vec<u8> {
    encode_small(tag, &[value])
}

/// Command request, same shape as a read
pub fn command_request(tag: u8) -> Vec<u8> {
    encode_small(tag, &[])
}

/// Error codes carried by an error-tag response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    CrcMismatch,
    InvalidTag,
    InvalidLength,
    OutOfRange,
    ReadOnly,
    InvalidProtocolId,
    Unknown(u8),
}

impl ErrorCode {
    pub fn from_byte(code: u8) -> Self {
        match code {
            0x01 => ErrorCode::CrcMismatch,
            0x02 => ErrorCode::InvalidTag,
            0x03 => ErrorCode::InvalidLength,
            0x04 => ErrorCode::OutOfRange,
            0x05 => ErrorCode::ReadOnly,
            0x06 => ErrorCode::InvalidProtocolId,
            other => ErrorCode::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ErrorCode::CrcMismatch => 0x01,
            ErrorCode::InvalidTag => 0x02,
            ErrorCode::InvalidLength => 0x03,
            ErrorCode::OutOfRange => 0x04,
            ErrorCode::ReadOnly => 0x05,
            ErrorCode::InvalidProtocolId => 0x06,
            ErrorCode::Unknown(b) => b,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::CrcMismatch => "peripheral received a corrupted frame",
            ErrorCode::InvalidTag => "peripheral does not know this field",
            ErrorCode::InvalidLength => "value has the wrong size for this field",
            ErrorCode::OutOfRange => "value is out of the allowed range",
            ErrorCode::ReadOnly => "field is read-only",
            ErrorCode::InvalidProtocolId => "peripheral rejected the protocol id",
            ErrorCode::Unknown(_) => "peripheral reported an unknown error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02x})", self.description(), self.as_byte())
    }
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq)]
pub struct TlvResponse {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl TlvResponse {
    /// Write or command accepted
    pub fn is_ok(&self) -> bool {
        self.tag == TAG_OK && (self.value.is_empty() || self.value == [0x00])
    }

    /// Error code if this is an error-tag response
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.tag != TAG_ERROR {
            return None;
        }
        // An error frame without a code byte still is an error
        Some(ErrorCode::from_byte(self.value.first().copied().unwrap_or(0)))
    }

    pub fn as_f32(&self) -> Result<f32, ProtocolError> {
        let bytes: [u8; 4] = self
            .value
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(ProtocolError::ValueTooShort { expected: 4, actual: self.value.len() })?;
        Ok(f32::from_le_bytes(bytes))
    }

    pub fn as_u8(&self) -> Result<u8, ProtocolError> {
        self.value
            .first()
            .copied()
            .ok_or(ProtocolError::ValueTooShort { expected: 1, actual: 0 })
    }
}

/// Decode a response frame received from the peripheral
pub fn decode_response(frame: &[u8]) -> Result<TlvResponse, ProtocolError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::TooShort(frame.len()));
    }
    if !crc::validate(frame) {
        return Err(ProtocolError::CrcMismatch);
    }
    if frame[0] != PROTOCOL_ID {
        return Err(ProtocolError::InvalidProtocolId(frame[0]));
    }

    let tag = frame[1];
    let declared = frame[2] as usize;
    if HEADER_LEN + declared + CRC_LEN > frame.len() {
        return Err(ProtocolError::LengthMismatch { declared, actual: frame.len() });
    }

    Ok(TlvResponse {
        tag,
        value: frame[HEADER_LEN..HEADER_LEN + declared].to_vec(),
    })
}
