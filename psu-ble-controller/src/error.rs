//! Error taxonomy for the BLE client

use psu_proto::{ErrorCode, ProtocolError};
use thiserror::Error;
use uuid::Uuid;

use crate::transport::Capability;

/// Link-level failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("peripheral disconnected")]
    Disconnected,
    #[error("no response after {attempts} attempts")]
    NoResponse { attempts: u32 },
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("characteristic {uuid} does not support {capability}")]
    MissingCapability { uuid: Uuid, capability: Capability },
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no PSU device found")]
    DeviceNotFound,
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    #[error("bluetooth: {0}")]
    Ble(#[from] btleplug::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("security handshake failed: {0}")]
    HandshakeFailed(String),
}

impl CryptoError {
    pub(crate) fn handshake(reason: impl Into<String>) -> Self {
        CryptoError::HandshakeFailed(reason.into())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("peripheral rejected request: {0}")]
    Peripheral(ErrorCode),
    #[error("unexpected response tag 0x{tag:02x}")]
    UnexpectedResponse { tag: u8 },
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("provisioning: {0}")]
    Provisioning(String),
    #[error("configuration: {0}")]
    Config(String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<btleplug::Error> for Error {
    fn from(e: btleplug::Error) -> Self {
        Error::Transport(TransportError::Ble(e))
    }
}

impl Error {
    /// What the user can do about it
    pub fn guidance(&self) -> &'static str {
        match self {
            Error::Transport(TransportError::NoAdapter) => {
                "Check that Bluetooth is turned on and this computer has a Bluetooth adapter."
            }
            Error::Transport(TransportError::DeviceNotFound) => {
                "Make sure the power supply is switched on and within range, then scan again."
            }
            Error::Transport(TransportError::NotConnected) => "Connect to the power supply first.",
            Error::Transport(TransportError::Disconnected) => {
                "The power supply went out of range or was switched off. Reconnect and retry."
            }
            Error::Transport(TransportError::NoResponse { .. }) | Error::Protocol(_) => {
                "The power supply is not answering reliably. Move closer and retry."
            }
            Error::Transport(TransportError::CharacteristicNotFound(_))
            | Error::Transport(TransportError::MissingCapability { .. })
            | Error::UnexpectedResponse { .. } => {
                "The device firmware does not speak this protocol version. Update the firmware."
            }
            Error::Transport(TransportError::Unsupported(_)) => {
                "This platform's Bluetooth stack does not support the operation."
            }
            Error::Transport(TransportError::Ble(_)) => {
                "Bluetooth reported an error. Toggle Bluetooth off and on, then retry."
            }
            Error::Crypto(_) => {
                "Secure session failed. \
                 Check the proof-of-possession code, then reconnect and retry."
            }
            Error::Peripheral(ErrorCode::OutOfRange) => "The value is outside the allowed range.",
            Error::Peripheral(ErrorCode::ReadOnly) => "This setting cannot be changed.",
            Error::Peripheral(_) => "The power supply rejected the request.",
            Error::Timeout(_) => "The device took too long. Retry, or power-cycle the device.",
            Error::Provisioning(_) => "The device sent an unexpected reply. Reconnect and retry.",
            Error::Config(_) | Error::Io(_) | Error::Json(_) => "Check the configuration file.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peripheral_codes_have_specific_guidance() {
        let e = Error::Peripheral(ErrorCode::OutOfRange);
        assert!(e.guidance().contains("range"));
        assert!(e.to_string().contains("out of the allowed range"));
    }

    #[test]
    fn transport_errors_are_actionable() {
        let e: Error = TransportError::NoResponse { attempts: 3 }.into();
        assert_eq!(e.to_string(), "no response after 3 attempts");
        assert!(e.guidance().contains("closer"));

        let e: Error = TransportError::NoAdapter.into();
        assert!(e.guidance().contains("Bluetooth"));
    }
}
