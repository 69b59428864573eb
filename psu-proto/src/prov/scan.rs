//! Wi-Fi scan messages
//!
//! ```text
//! WiFiScanPayload { msg = 1; status = 2; cmd_scan_start = 10; resp_scan_start = 11;
//!                   cmd_scan_status = 12; resp_scan_status = 13;
//!                   cmd_scan_result = 14; resp_scan_result = 15 }
//! CmdScanStart    { blocking = 1; passive = 2; group_channels = 3; period_ms = 4 }
//! RespScanStatus  { scan_finished = 1; result_count = 2 }
//! CmdScanResult   { start_index = 1; count = 2 }
//! RespScanResult  { repeated WiFiScanResult entries = 1 }
//! WiFiScanResult  { ssid = 1; channel = 2; rssi = 3; bssid = 4; auth = 5 }
//! ```

use super::{AuthMode, Status};
use crate::protobuf::{Reader, Writer};

const PAYLOAD_MSG: u32 = 1;
const PAYLOAD_STATUS: u32 = 2;

const MSG_CMD_START: u64 = 0;
const MSG_RESP_START: u64 = 1;
const MSG_CMD_STATUS: u64 = 2;
const MSG_RESP_STATUS: u64 = 3;
const MSG_CMD_RESULT: u64 = 4;
const MSG_RESP_RESULT: u64 = 5;

/// One access point reported by the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub channel: u32,
    pub rssi: i32,
    pub bssid: Vec<u8>,
    pub auth_mode: AuthMode,
}

impl AccessPoint {
    fn encode(&self) -> Writer {
        Writer::new()
            .string(1, &self.ssid)
            .varint(2, self.channel as u64)
            // int32 is sign-extended to 64 bits on the wire
            .varint(3, self.rssi as i64 as u64)
            .bytes(4, &self.bssid)
            .varint(5, self.auth_mode.as_u64())
    }

    fn decode(r: Reader<'_>) -> Self {
        Self {
            ssid: String::from_utf8_lossy(r.bytes(1).unwrap_or_default()).into_owned(),
            channel: r.varint(2).unwrap_or(0) as u32,
            rssi: r.signed(3).unwrap_or(0) as i32,
            bssid: r.bytes(4).unwrap_or_default().to_vec(),
            auth_mode: AuthMode::from_u64(r.varint(5).unwrap_or(0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMessage {
    StartCommand {
        blocking: bool,
        passive: bool,
        group_channels: u32,
        period_ms: u32,
    },
    StartResponse,
    StatusCommand,
    StatusResponse {
        finished: bool,
        result_count: u32,
    },
    ResultCommand {
        start_index: u32,
        count: u32,
    },
    ResultResponse {
        entries: Vec<AccessPoint>,
    },
}

/// WiFiScanPayload envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPayload {
    pub status: Status,
    pub message: ScanMessage,
}

impl ScanPayload {
    pub fn command(message: ScanMessage) -> Self {
        Self { status: Status::Success, message }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (msg, body) = match &self.message {
            ScanMessage::StartCommand { blocking, passive, group_channels, period_ms } => (
                MSG_CMD_START,
                Writer::new()
                    .bool(1, *blocking)
                    .bool(2, *passive)
                    .varint(3, *group_channels as u64)
                    .varint(4, *period_ms as u64),
            ),
            ScanMessage::StartResponse => (MSG_RESP_START, Writer::new()),
            ScanMessage::StatusCommand => (MSG_CMD_STATUS, Writer::new()),
            ScanMessage::StatusResponse { finished, result_count } => (
                MSG_RESP_STATUS,
                Writer::new().bool(1, *finished).varint(2, *result_count as u64),
            ),
            ScanMessage::ResultCommand { start_index, count } => (
                MSG_CMD_RESULT,
                Writer::new().varint(1, *start_index as u64).varint(2, *count as u64),
            ),
            ScanMessage::ResultResponse { entries } => (
                MSG_RESP_RESULT,
                entries
                    .iter()
                    .fold(Writer::new(), |w, ap| w.message(1, ap.encode())),
            ),
        };

        // payload field numbers are 10 + message type
        Writer::new()
            .varint(PAYLOAD_MSG, msg)
            .varint(PAYLOAD_STATUS, self.status.as_u64())
            .message(10 + msg as u32, body)
            .finish()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let r = Reader::new(data);
        let msg = r.varint(PAYLOAD_MSG).unwrap_or(MSG_CMD_START);
        let status = Status::from_field(r.varint(PAYLOAD_STATUS));
        let field = 10 + u32::try_from(msg).ok()?;
        // An error status may come without a body
        let body = r.message(field).unwrap_or(Reader::new(&[]));

        let message = match msg {
            MSG_CMD_START => ScanMessage::StartCommand {
                blocking: body.bool(1).unwrap_or(false),
                passive: body.bool(2).unwrap_or(false),
                group_channels: body.varint(3).unwrap_or(0) as u32,
                period_ms: body.varint(4).unwrap_or(0) as u32,
            },
            MSG_RESP_START => ScanMessage::StartResponse,
            MSG_CMD_STATUS => ScanMessage::StatusCommand,
            MSG_RESP_STATUS => ScanMessage::StatusResponse {
                finished: body.bool(1).unwrap_or(false),
                result_count: body.varint(2).unwrap_or(0) as u32,
            },
            MSG_CMD_RESULT => ScanMessage::ResultCommand {
                start_index: body.varint(1).unwrap_or(0) as u32,
                count: body.varint(2).unwrap_or(0) as u32,
            },
            MSG_RESP_RESULT => ScanMessage::ResultResponse {
                entries: body
                    .repeated_bytes(1)
                    .into_iter()
                    .map(|e| AccessPoint::decode(Reader::new(e)))
                    .collect(),
            },
            _ => return None,
        };

        Some(Self { status, message })
    }
}
