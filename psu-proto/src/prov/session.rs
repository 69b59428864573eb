//! Security1 session messages
//!
//! ```text
//! SessionData   { sec_ver = 2; sec1 = 11 }
//! Sec1Payload   { msg = 1; sc0 = 20; sr0 = 21; sc1 = 22; sr1 = 23 }
//! SessionCmd0   { client_pubkey = 1 }
//! SessionResp0  { status = 1; device_pubkey = 2; device_random = 3 }
//! SessionCmd1   { client_verify_data = 2 }
//! SessionResp1  { status = 1; device_verify_data = 3 }
//! ```

use super::Status;
use crate::protobuf::{Reader, Writer};

pub const SEC_SCHEME_1: u64 = 1;

const SESSION_SEC_VER: u32 = 2;
const SESSION_SEC1: u32 = 11;

const SEC1_MSG: u32 = 1;
const SEC1_SC0: u32 = 20;
const SEC1_SR0: u32 = 21;
const SEC1_SC1: u32 = 22;
const SEC1_SR1: u32 = 23;

const MSG_COMMAND0: u64 = 0;
const MSG_RESPONSE0: u64 = 1;
const MSG_COMMAND1: u64 = 2;
const MSG_RESPONSE1: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    Command0 {
        client_pubkey: Vec<u8>,
    },
    Response0 {
        status: Status,
        device_pubkey: Vec<u8>,
        device_random: Vec<u8>,
    },
    Command1 {
        client_verify_data: Vec<u8>,
    },
    Response1 {
        status: Status,
        device_verify_data: Vec<u8>,
    },
}

impl SessionMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let (msg, field, body) = match self {
            SessionMessage::Command0 { client_pubkey } => {
                (MSG_COMMAND0, SEC1_SC0, Writer::new().bytes(1, client_pubkey))
            }
            SessionMessage::Response0 { status, device_pubkey, device_random } => (
                MSG_RESPONSE0,
                SEC1_SR0,
                Writer::new()
                    .varint(1, status.as_u64())
                    .bytes(2, device_pubkey)
                    .bytes(3, device_random),
            ),
            SessionMessage::Command1 { client_verify_data } => {
                (MSG_COMMAND1, SEC1_SC1, Writer::new().bytes(2, client_verify_data))
            }
            SessionMessage::Response1 { status, device_verify_data } => (
                MSG_RESPONSE1,
                SEC1_SR1,
                Writer::new().varint(1, status.as_u64()).bytes(3, device_verify_data),
            ),
        };

        let sec1 = Writer::new().varint(SEC1_MSG, msg).message(field, body);
        Writer::new()
            .varint(SESSION_SEC_VER, SEC_SCHEME_1)
            .message(SESSION_SEC1, sec1)
            .finish()
    }

    /// Decode a SessionData envelope; `None` unless it is a well-formed Security1 message.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let envelope = Reader::new(data);
        if envelope.varint(SESSION_SEC_VER).unwrap_or(0) != SEC_SCHEME_1 {
            return None;
        }
        let sec1 = envelope.message(SESSION_SEC1)?;

        match sec1.varint(SEC1_MSG).unwrap_or(MSG_COMMAND0) {
            MSG_COMMAND0 => {
                let body = sec1.message(SEC1_SC0)?;
                Some(SessionMessage::Command0 {
                    client_pubkey: body.bytes(1).unwrap_or_default().to_vec(),
                })
            }
            MSG_RESPONSE0 => {
                let body = sec1.message(SEC1_SR0)?;
                Some(SessionMessage::Response0 {
                    status: Status::from_field(body.varint(1)),
                    device_pubkey: body.bytes(2).unwrap_or_default().to_vec(),
                    device_random: body.bytes(3).unwrap_or_default().to_vec(),
                })
            }
            MSG_COMMAND1 => {
                let body = sec1.message(SEC1_SC1)?;
                Some(SessionMessage::Command1 {
                    client_verify_data: body.bytes(2).unwrap_or_default().to_vec(),
                })
            }
            MSG_RESPONSE1 => {
                let body = sec1.message(SEC1_SR1)?;
                Some(SessionMessage::Response1 {
                    status: Status::from_field(body.varint(1)),
                    device_verify_data: body.bytes(3).unwrap_or_default().to_vec(),
                })
            }
            _ => None,
        }
    }
}
