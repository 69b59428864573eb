//! PSU link protocol - framing, bundles and provisioning messages
//!
//! Everything here is synchronous and allocation-light so it can be shared
//! by the BLE client, tests and tooling.

pub mod ble;
pub mod bundle;
pub mod crc;
pub mod error;
pub mod prov;
pub mod protobuf;
pub mod tags;
pub mod tlv;

pub use bundle::{ConfigBundle, ConfigLayout, Telemetry};
pub use error::ProtocolError;
pub use tags::{
    ByteSetting, Command, Field, FloatSetting, Measurement, TAG_CONFIG, TAG_ERROR, TAG_OK,
    TAG_TELEMETRY,
};
pub use tlv::{
    ErrorCode, TlvResponse, command_request, decode_response, encode_frame, read_request,
    write_f32_request, write_u8_request, PROTOCOL_ID,
};
