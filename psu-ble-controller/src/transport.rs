//! GATT transport abstraction
//!
//! The engine and the provisioner only talk to the peripheral through this
//! trait. [`crate::ble::BleTransport`] implements it with btleplug; tests use a
//! scripted peripheral.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::TransportError;

/// A discovered characteristic and what it can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

/// Asynchronous events delivered by the BLE stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Notification { uuid: Uuid, value: Vec<u8> },
    Disconnected,
}

pub type EventStream = BoxStream<'static, TransportEvent>;

#[async_trait]
pub trait GattTransport: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Discover services and list every characteristic
    async fn discover(&self) -> Result<Vec<GattCharacteristic>, TransportError>;

    async fn subscribe(&self, uuid: Uuid) -> Result<(), TransportError>;

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), TransportError>;

    async fn write(
        &self,
        uuid: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError>;

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError>;

    /// Notifications and disconnects for this peripheral, from now on
    async fn events(&self) -> Result<EventStream, TransportError>;

    /// Whether [`GattTransport::request_mtu`] is available on this platform
    fn supports_mtu_negotiation(&self) -> bool {
        false
    }

    /// Returns the negotiated MTU
    async fn request_mtu(&self, _mtu: u16) -> Result<u16, TransportError> {
        Err(TransportError::Unsupported("MTU negotiation"))
    }
}

/// Something a characteristic must be able to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
    Notify,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Notify => "notify",
        })
    }
}

impl GattCharacteristic {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Read => self.read,
            Capability::Write => self.write,
            Capability::Notify => self.notify,
        }
    }

    pub fn require(&self, capability: Capability) -> Result<&Self, TransportError> {
        if self.supports(capability) {
            Ok(self)
        } else {
            Err(TransportError::MissingCapability {
                uuid: self.uuid,
                capability,
            })
        }
    }
}

/// Find a characteristic by exact UUID within `service`
pub fn find_characteristic(
    chars: &[GattCharacteristic],
    service: Uuid,
    uuid: Uuid,
) -> Result<&GattCharacteristic, TransportError> {
    chars
        .iter()
        .find(|c| c.service_uuid == service && c.uuid == uuid)
        .ok_or(TransportError::CharacteristicNotFound(uuid))
}

/// Find a characteristic of `service` whose UUID contains `pattern`
/// (case-insensitive)
pub fn match_characteristic<'a>(
    chars: &'a [GattCharacteristic],
    service: Uuid,
    pattern: &str,
) -> Option<&'a GattCharacteristic> {
    let pattern = pattern.to_ascii_lowercase();
    chars
        .iter()
        .filter(|c| c.service_uuid == service)
        .find(|c| c.uuid.hyphenated().to_string().contains(&pattern))
}

/// Write with response, then read the reply from the same characteristic
pub async fn write_read<T: GattTransport + ?Sized>(
    transport: &T,
    uuid: Uuid,
    data: &[u8],
) -> Result<Vec<u8>, TransportError> {
    transport.write(uuid, data, true).await?;
    transport.read(uuid).await
}
