//! Wi-Fi station config messages
//!
//! ```text
//! WiFiConfigPayload { msg = 1; cmd_get_status = 10; resp_get_status = 11;
//!                     cmd_set_config = 12; resp_set_config = 13;
//!                     cmd_apply_config = 14; resp_apply_config = 15 }
//! CmdSetConfig      { ssid = 1; passphrase = 2; bssid = 3; channel = 4 }
//! RespSetConfig     { status = 1 }
//! RespApplyConfig   { status = 1 }
//! RespGetStatus     { status = 1; sta_state = 2; fail_reason = 10; connected = 11 }
//! WifiConnectedState{ ip4_addr = 1; auth_mode = 2; ssid = 3; bssid = 4; channel = 5 }
//! ```

use super::{AuthMode, Status};
use crate::protobuf::{Reader, Writer};

const PAYLOAD_MSG: u32 = 1;

const MSG_CMD_GET_STATUS: u64 = 0;
const MSG_RESP_GET_STATUS: u64 = 1;
const MSG_CMD_SET_CONFIG: u64 = 2;
const MSG_RESP_SET_CONFIG: u64 = 3;
const MSG_CMD_APPLY_CONFIG: u64 = 4;
const MSG_RESP_APPLY_CONFIG: u64 = 5;

/// Station state reported by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Connected,
    Connecting,
    Disconnected,
    ConnectionFailed,
    Other(u64),
}

impl StationState {
    pub fn from_u64(v: u64) -> Self {
        match v {
            0 => StationState::Connected,
            1 => StationState::Connecting,
            2 => StationState::Disconnected,
            3 => StationState::ConnectionFailed,
            other => StationState::Other(other),
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            StationState::Connected => 0,
            StationState::Connecting => 1,
            StationState::Disconnected => 2,
            StationState::ConnectionFailed => 3,
            StationState::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    AuthError,
    NetworkNotFound,
    Other(u64),
}

impl FailReason {
    pub fn from_u64(v: u64) -> Self {
        match v {
            0 => FailReason::AuthError,
            1 => FailReason::NetworkNotFound,
            other => FailReason::Other(other),
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            FailReason::AuthError => 0,
            FailReason::NetworkNotFound => 1,
            FailReason::Other(v) => v,
        }
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailReason::AuthError => f.write_str("wrong Wi-Fi password"),
            FailReason::NetworkNotFound => f.write_str("Wi-Fi network not found"),
            FailReason::Other(v) => write!(f, "connection failed (reason {v})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedInfo {
    pub ip4_addr: String,
    pub auth_mode: AuthMode,
    pub ssid: String,
    pub channel: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationStatus {
    pub status: Status,
    pub state: StationState,
    pub fail_reason: Option<FailReason>,
    pub connected: Option<ConnectedInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigMessage {
    GetStatusCommand,
    GetStatusResponse(StationStatus),
    SetConfigCommand { ssid: String, passphrase: String },
    SetConfigResponse { status: Status },
    ApplyCommand,
    ApplyResponse { status: Status },
}

/// WiFiConfigPayload envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    pub message: ConfigMessage,
}

impl ConfigPayload {
    pub fn new(message: ConfigMessage) -> Self {
        Self { message }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (msg, body) = match &self.message {
            ConfigMessage::GetStatusCommand => (MSG_CMD_GET_STATUS, Writer::new()),
            ConfigMessage::GetStatusResponse(s) => {
                let mut w = Writer::new()
                    .varint(1, s.status.as_u64())
                    .varint(2, s.state.as_u64());
                if let Some(reason) = s.fail_reason {
                    w = w.varint_always(10, reason.as_u64());
                }
                if let Some(info) = &s.connected {
                    w = w.message(
                        11,
                        Writer::new()
                            .string(1, &info.ip4_addr)
                            .varint(2, info.auth_mode.as_u64())
                            .string(3, &info.ssid)
                            .varint(5, info.channel as u64),
                    );
                }
                (MSG_RESP_GET_STATUS, w)
            }
            ConfigMessage::SetConfigCommand { ssid, passphrase } => (
                MSG_CMD_SET_CONFIG,
                Writer::new().string(1, ssid).string(2, passphrase),
            ),
            ConfigMessage::SetConfigResponse { status } => {
                (MSG_RESP_SET_CONFIG, Writer::new().varint(1, status.as_u64()))
            }
            ConfigMessage::ApplyCommand => (MSG_CMD_APPLY_CONFIG, Writer::new()),
            ConfigMessage::ApplyResponse { status } => {
                (MSG_RESP_APPLY_CONFIG, Writer::new().varint(1, status.as_u64()))
            }
        };

        Writer::new()
            .varint(PAYLOAD_MSG, msg)
            .message(10 + msg as u32, body)
            .finish()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let r = Reader::new(data);
        let msg = r.varint(PAYLOAD_MSG).unwrap_or(MSG_CMD_GET_STATUS);
        let body = r.message(10 + u32::try_from(msg).ok()?).unwrap_or(Reader::new(&[]));

        let message = match msg {
            MSG_CMD_GET_STATUS => ConfigMessage::GetStatusCommand,
            MSG_RESP_GET_STATUS => ConfigMessage::GetStatusResponse(StationStatus {
                status: Status::from_field(body.varint(1)),
                state: StationState::from_u64(body.varint(2).unwrap_or(0)),
                fail_reason: body.varint(10).map(FailReason::from_u64),
                connected: body.message(11).map(|c| ConnectedInfo {
                    ip4_addr: String::from_utf8_lossy(c.bytes(1).unwrap_or_default()).into_owned(),
                    auth_mode: AuthMode::from_u64(c.varint(2).unwrap_or(0)),
                    ssid: String::from_utf8_lossy(c.bytes(3).unwrap_or_default()).into_owned(),
                    channel: c.varint(5).unwrap_or(0) as u32,
                }),
            }),
            MSG_CMD_SET_CONFIG => ConfigMessage::SetConfigCommand {
                ssid: String::from_utf8_lossy(body.bytes(1).unwrap_or_default()).into_owned(),
                passphrase: String::from_utf8_lossy(body.bytes(2).unwrap_or_default()).into_owned(),
            },
            MSG_RESP_SET_CONFIG => ConfigMessage::SetConfigResponse {
                status: Status::from_field(body.varint(1)),
            },
            MSG_CMD_APPLY_CONFIG => ConfigMessage::ApplyCommand,
            MSG_RESP_APPLY_CONFIG => ConfigMessage::ApplyResponse {
                status: Status::from_field(body.varint(1)),
            },
            _ => return None,
        };

        Some(Self { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_config_wire_layout() {
        let bytes = ConfigPayload::new(ConfigMessage::SetConfigCommand {
            ssid: "net".into(),
            passphrase: "pw".into(),
        })
        .to_bytes();
        assert_eq!(
            bytes,
            [0x08, 0x02, 0x62, 0x09, 0x0A, 0x03, b'n', b'e', b't', 0x12, 0x02, b'p', b'w']
        );
    }

    #[test]
    fn set_config_response_without_status_is_success() {
        // resp_set_config present but empty
        let bytes = [0x08, 0x03, 0x6A, 0x00];
        assert_eq!(
            ConfigPayload::from_bytes(&bytes).map(|p| p.message),
            Some(ConfigMessage::SetConfigResponse { status: Status::Success })
        );
    }

    #[test]
    fn connected_status_round_trip() {
        let status = StationStatus {
            status: Status::Success,
            state: StationState::Connected,
            fail_reason: None,
            connected: Some(ConnectedInfo {
                ip4_addr: "192.168.1.20".into(),
                auth_mode: AuthMode::Wpa2Psk,
                ssid: "home".into(),
                channel: 6,
            }),
        };
        let bytes = ConfigPayload::new(ConfigMessage::GetStatusResponse(status.clone())).to_bytes();
        assert_eq!(
            ConfigPayload::from_bytes(&bytes).map(|p| p.message),
            Some(ConfigMessage::GetStatusResponse(status))
        );
    }

    #[test]
    fn auth_error_fail_reason_survives_zero_value() {
        let status = StationStatus {
            status: Status::Success,
            state: StationState::ConnectionFailed,
            fail_reason: Some(FailReason::AuthError),
            connected: None,
        };
        let bytes = ConfigPayload::new(ConfigMessage::GetStatusResponse(status)).to_bytes();
        match ConfigPayload::from_bytes(&bytes).map(|p| p.message) {
            Some(ConfigMessage::GetStatusResponse(s)) => {
                assert_eq!(s.state, StationState::ConnectionFailed);
                assert_eq!(s.fail_reason, Some(FailReason::AuthError));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type() {
        let bytes = Writer::new().varint(1, 42).finish();
        assert_eq!(ConfigPayload::from_bytes(&bytes), None);
    }
}
