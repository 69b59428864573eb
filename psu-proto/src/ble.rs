//! BLE GATT constants for the PSU peripheral
//!
//! Two services are exposed. The telemetry service carries TLV frames, the
//! provisioning service carries Security1 and Wi-Fi protobuf messages.

/// Telemetry service UUID: 7e5a0001-3c1d-4f2e-9b8a-50535500a001
pub const SERVICE_UUID: &str = "7e5a0001-3c1d-4f2e-9b8a-50535500a001";

/// Request characteristic (write)
pub const REQUEST_UUID: &str = "7e5a0002-3c1d-4f2e-9b8a-50535500a001";

/// Response characteristic (notify + read)
pub const RESPONSE_UUID: &str = "7e5a0003-3c1d-4f2e-9b8a-50535500a001";

/// Advertised name prefix of PSU peripherals
pub const DEVICE_NAME_PREFIX: &str = "PSU";

/// Provisioning endpoints
pub mod provisioning {
    /// Provisioning service UUID (ESP-IDF BLE transport default)
    pub const SERVICE_UUID: &str = "021a9004-0382-4aea-bff4-6b3f1c5adfb4";

    /// UUID substring identifying the Wi-Fi scan endpoint
    pub const SCAN_MATCH: &str = "ff50";

    /// UUID substring identifying the Security1 session endpoint
    pub const SESSION_MATCH: &str = "ff51";

    /// UUID substring identifying the Wi-Fi config endpoint
    pub const CONFIG_MATCH: &str = "ff52";
}
