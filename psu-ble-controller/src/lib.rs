//! PSU BLE Controller
//!
//! BLE client for reading and configuring PSU power supplies and for
//! handing Wi-Fi credentials to their network module.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use psu_ble_controller::{ble, BleTransport, ControllerConfig, Engine, Psu, Provisioner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), psu_ble_controller::Error> {
//!     let config = ControllerConfig::load_or_default(None)?;
//!     let adapter = ble::get_adapter().await?;
//!
//!     // Scan for devices
//!     let prefix = &config.gatt.device_name_prefix;
//!     let devices = ble::scan(&adapter, Duration::from_secs(5), prefix).await?;
//!     for device in &devices {
//!         println!("{} ({})", device.name, device.address);
//!     }
//!
//!     // Read telemetry
//!     let peripheral = ble::find_device(&adapter, None, prefix, Duration::from_secs(5)).await?;
//!     let transport = Arc::new(BleTransport::new(adapter, peripheral));
//!     let engine = Engine::new(transport.clone(), config.engine.clone(), &config.gatt)?;
//!     let psu = Psu::new(engine, config.layout()?);
//!     psu.connect().await?;
//!     println!("{:?}", psu.read_telemetry().await?);
//!     psu.disconnect().await?;
//!
//!     // Provision Wi-Fi
//!     let provisioner = Provisioner::new(transport, config.provisioning, config.gatt);
//!     println!("{:?}", provisioner.provision("MySSID", "MyPassword").await);
//!
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod config;
pub mod engine;
pub mod error;
pub mod provision;
pub mod psu;
pub mod security;
pub mod transport;

#[cfg(test)]
mod mock;

pub use ble::BleTransport;
pub use config::{ControllerConfig, EngineConfig, GattConfig, ProvisioningConfig, psu_home};
pub use engine::{ConnectionState, Engine};
pub use error::{CryptoError, Error, TransportError};
pub use provision::{ProvisionOutcome, ProvisionResult, Provisioner};
pub use psu::Psu;
pub use transport::{GattCharacteristic, GattTransport, TransportEvent};
