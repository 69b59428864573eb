//! Typed power supply operations on top of the transaction engine

use psu_proto::tlv::{self, TlvResponse};
use psu_proto::{
    ByteSetting, Command, ConfigBundle, ConfigLayout, FloatSetting, Measurement, TAG_CONFIG,
    TAG_TELEMETRY, Telemetry,
};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::Error;
use crate::transport::GattTransport;

pub struct Psu<T: GattTransport> {
    engine: Engine<T>,
    layout: ConfigLayout,
}

impl<T: GattTransport> Psu<T> {
    pub fn new(engine: Engine<T>, layout: ConfigLayout) -> Self {
        Self { engine, layout }
    }

    pub async fn connect(&self) -> Result<(), Error> {
        self.engine.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        self.engine.disconnect().await
    }

    async fn read(&self, tag: u8) -> Result<TlvResponse, Error> {
        let resp = self.engine.send_request(&tlv::read_request(tag)).await?;
        if resp.tag != tag {
            return Err(Error::UnexpectedResponse { tag: resp.tag });
        }
        Ok(resp)
    }

    async fn expect_ok(&self, frame: &[u8]) -> Result<(), Error> {
        let resp = self.engine.send_request(frame).await?;
        if !resp.is_ok() {
            return Err(Error::UnexpectedResponse { tag: resp.tag });
        }
        Ok(())
    }

    pub async fn read_telemetry(&self) -> Result<Telemetry, Error> {
        let resp = self.read(TAG_TELEMETRY).await?;
        Ok(Telemetry::decode(&resp.value)?)
    }

    /// Read the config bundle, falling back to one read per field when the
    /// bundle is malformed, shorter than the layout, or not supported.
    pub async fn read_config(&self) -> Result<ConfigBundle, Error> {
        match self.read_config_bundle().await {
            Ok(bundle) => Ok(bundle),
            Err(
                e @ (Error::Protocol(_) | Error::Peripheral(_) | Error::UnexpectedResponse { .. }),
            ) => {
                warn!(error = %e, "config bundle unusable, reading fields one by one");
                self.read_config_fields().await
            }
            Err(e) => Err(e),
        }
    }

    async fn read_config_bundle(&self) -> Result<ConfigBundle, Error> {
        let resp = self.read(TAG_CONFIG).await?;
        let expected = self.layout.value_len();
        if resp.value.len() < expected {
            return Err(psu_proto::ProtocolError::ValueTooShort {
                expected,
                actual: resp.value.len(),
            }
            .into());
        }
        Ok(ConfigBundle::decode(&resp.value, &self.layout)?)
    }

    pub async fn read_config_fields(&self) -> Result<ConfigBundle, Error> {
        let mut bundle = ConfigBundle::default();
        for setting in FloatSetting::ALL {
            bundle.set_float(setting, self.read_float(setting).await?);
        }
        for setting in self.layout.settings.clone() {
            bundle.settings.push((setting, self.read_byte(setting).await?));
        }
        debug!(layout = %self.layout.name, "config assembled from single reads");
        Ok(bundle)
    }

    pub async fn read_measurement(&self, measurement: Measurement) -> Result<f32, Error> {
        Ok(self.read(measurement.tag()).await?.as_f32()?)
    }

    pub async fn read_float(&self, setting: FloatSetting) -> Result<f32, Error> {
        Ok(self.read(setting.tag()).await?.as_f32()?)
    }

    pub async fn write_float(&self, setting: FloatSetting, value: f32) -> Result<(), Error> {
        debug!(setting = setting.name(), value, "writing setting");
        self.expect_ok(&tlv::write_f32_request(setting.tag(), value)).await
    }

    pub async fn read_byte(&self, setting: ByteSetting) -> Result<u8, Error> {
        Ok(self.read(setting.tag()).await?.as_u8()?)
    }

    pub async fn write_byte(&self, setting: ByteSetting, value: u8) -> Result<(), Error> {
        debug!(setting = setting.name(), value, "writing setting");
        self.expect_ok(&tlv::write_u8_request(setting.tag(), value)).await
    }

    pub async fn command(&self, command: Command) -> Result<(), Error> {
        debug!(command = command.name(), "sending command");
        self.expect_ok(&tlv::command_request(command.tag())).await
    }
}
