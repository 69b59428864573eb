//! Provisioning message shapes
//!
//! Field numbers follow the ESP-IDF provisioning protos the peripheral
//! firmware is built on. Only the messages used by the client are modelled,
//! each with an encoder and a decoder so both ends can be exercised.

pub mod config;
pub mod scan;
pub mod session;

pub use config::{
    ConfigMessage, ConfigPayload, ConnectedInfo, FailReason, StationState, StationStatus,
};
pub use scan::{AccessPoint, ScanMessage, ScanPayload};
pub use session::{SEC_SCHEME_1, SessionMessage};

/// Status code shared by every provisioning response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Success,
    InvalidSecScheme,
    InvalidProto,
    TooManySessions,
    InvalidArgument,
    InternalError,
    CryptoError,
    InvalidSession,
    Other(u64),
}

impl Status {
    pub fn from_u64(v: u64) -> Self {
        match v {
            0 => Status::Success,
            1 => Status::InvalidSecScheme,
            2 => Status::InvalidProto,
            3 => Status::TooManySessions,
            4 => Status::InvalidArgument,
            5 => Status::InternalError,
            6 => Status::CryptoError,
            7 => Status::InvalidSession,
            other => Status::Other(other),
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Status::Success => 0,
            Status::InvalidSecScheme => 1,
            Status::InvalidProto => 2,
            Status::TooManySessions => 3,
            Status::InvalidArgument => 4,
            Status::InternalError => 5,
            Status::CryptoError => 6,
            Status::InvalidSession => 7,
            Status::Other(v) => v,
        }
    }

    /// Absent on the wire means success
    pub fn from_field(v: Option<u64>) -> Self {
        Self::from_u64(v.unwrap_or(0))
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

/// Wi-Fi authentication mode of an access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa2Enterprise,
    Wpa3Psk,
    Wpa2Wpa3Psk,
    Other(u64),
}

impl AuthMode {
    pub fn from_u64(v: u64) -> Self {
        match v {
            0 => AuthMode::Open,
            1 => AuthMode::Wep,
            2 => AuthMode::WpaPsk,
            3 => AuthMode::Wpa2Psk,
            4 => AuthMode::WpaWpa2Psk,
            5 => AuthMode::Wpa2Enterprise,
            6 => AuthMode::Wpa3Psk,
            7 => AuthMode::Wpa2Wpa3Psk,
            other => AuthMode::Other(other),
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            AuthMode::Open => 0,
            AuthMode::Wep => 1,
            AuthMode::WpaPsk => 2,
            AuthMode::Wpa2Psk => 3,
            AuthMode::WpaWpa2Psk => 4,
            AuthMode::Wpa2Enterprise => 5,
            AuthMode::Wpa3Psk => 6,
            AuthMode::Wpa2Wpa3Psk => 7,
            AuthMode::Other(v) => v,
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Open => f.write_str("open"),
            AuthMode::Wep => f.write_str("WEP"),
            AuthMode::WpaPsk => f.write_str("WPA"),
            AuthMode::Wpa2Psk => f.write_str("WPA2"),
            AuthMode::WpaWpa2Psk => f.write_str("WPA/WPA2"),
            AuthMode::Wpa2Enterprise => f.write_str("WPA2-Enterprise"),
            AuthMode::Wpa3Psk => f.write_str("WPA3"),
            AuthMode::Wpa2Wpa3Psk => f.write_str("WPA2/WPA3"),
            AuthMode::Other(v) => write!(f, "auth({v})"),
        }
    }
}
