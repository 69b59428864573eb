//! btleplug-backed discovery and GATT transport

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{EventStream, GattCharacteristic, GattTransport, TransportEvent};

/// A discovered BLE device
#[derive(Debug, Clone)]
pub struct PsuDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_psu: bool,
}

fn is_psu_name(name: &str, prefix: &str) -> bool {
    // "PSU-xxxx" or "nimble [PSU-xxxx]"
    name.starts_with(prefix) || name.contains(&format!("[{prefix}"))
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

/// Scan for BLE devices
///
/// Returns every device seen. PSU devices have `is_psu = true`.
pub async fn scan(
    adapter: &Adapter,
    duration: Duration,
    name_prefix: &str,
) -> Result<Vec<PsuDevice>, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let is_psu = is_psu_name(&name, name_prefix);
            devices.push(PsuDevice { name, address, rssi: props.rssi, is_psu });
        }
    }

    adapter.stop_scan().await?;
    debug!(count = devices.len(), "scan finished");
    Ok(devices)
}

/// Find a device by name/address pattern, or the first PSU seen
pub async fn find_device(
    adapter: &Adapter,
    target: Option<&str>,
    name_prefix: &str,
    duration: Duration,
) -> Result<Peripheral, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_default();
            let addr = peripheral.address().to_string();

            let matches = match target {
                Some(t) => name.contains(t) || addr.contains(t),
                None => is_psu_name(&name, name_prefix),
            };

            if matches {
                adapter.stop_scan().await?;
                info!(%name, %addr, "found device");
                return Ok(peripheral);
            }
        }
    }

    adapter.stop_scan().await?;
    Err(TransportError::DeviceNotFound)
}

/// GATT transport over a btleplug peripheral
///
/// btleplug exposes no MTU request, so MTU negotiation is reported as unsupported.
#[derive(Clone)]
pub struct BleTransport {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BleTransport {
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self { adapter, peripheral }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl GattTransport for BleTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<GattCharacteristic>, TransportError> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .characteristics()
            .into_iter()
            .map(|c| GattCharacteristic {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
                read: c.properties.contains(CharPropFlags::READ),
                write: c
                    .properties
                    .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE),
                notify: c
                    .properties
                    .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE),
            })
            .collect())
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<(), TransportError> {
        let c = self.characteristic(uuid)?;
        self.peripheral.subscribe(&c).await?;
        Ok(())
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), TransportError> {
        let c = self.characteristic(uuid)?;
        self.peripheral.unsubscribe(&c).await?;
        Ok(())
    }

    async fn write(
        &self,
        uuid: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        let c = self.characteristic(uuid)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral.write(&c, data, write_type).await?;
        Ok(())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        let c = self.characteristic(uuid)?;
        Ok(self.peripheral.read(&c).await?)
    }

    async fn events(&self) -> Result<EventStream, TransportError> {
        let id = self.peripheral.id();

        let notifications = self
            .peripheral
            .notifications()
            .await?
            .map(|n| TransportEvent::Notification { uuid: n.uuid, value: n.value });

        let disconnects = self.adapter.events().await?.filter_map(move |event| {
            let ours = matches!(&event, CentralEvent::DeviceDisconnected(d) if *d == id);
            futures::future::ready(ours.then_some(TransportEvent::Disconnected))
        });

        Ok(futures::stream::select(notifications, disconnects).boxed())
    }
}
