//! Fixed-offset bundle payloads
//!
//! Bundles are the value of a single TLV response. Decoders are pure
//! functions over the value bytes; tag dispatch happens elsewhere.

use crate::error::ProtocolError;
use crate::tags::{ByteSetting, FloatSetting};

pub const TELEMETRY_LEN: usize = 24;

/// 5 × f32 at the start of every config bundle
pub const CONFIG_FLOAT_BLOCK_LEN: usize = 20;

pub const MAX_BYTE_SETTINGS: usize = 10;

fn f32_at(value: &[u8], index: usize) -> f32 {
    let at = index * 4;
    f32::from_le_bytes([value[at], value[at + 1], value[at + 2], value[at + 3]])
}

/// Snapshot of live measurements
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    /// Volts
    pub voltage: f32,
    /// Amperes
    pub current: f32,
    /// Watts
    pub power: f32,
    /// Celsius
    pub inlet_temp: f32,
    /// Celsius
    pub internal_temp: f32,
    /// Watt-hours since last reset
    pub energy: f32,
}

impl Telemetry {
    pub fn decode(value: &[u8]) -> Result<Self, ProtocolError> {
        if value.len() < TELEMETRY_LEN {
            return Err(ProtocolError::ValueTooShort {
                expected: TELEMETRY_LEN,
                actual: value.len(),
            });
        }
        Ok(Self {
            voltage: f32_at(value, 0),
            current: f32_at(value, 1),
            power: f32_at(value, 2),
            inlet_temp: f32_at(value, 3),
            internal_temp: f32_at(value, 4),
            energy: f32_at(value, 5),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        [self.voltage, self.current, self.power, self.inlet_temp, self.internal_temp, self.energy]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }
}

/// Ordering of the byte settings that follow the float block
///
/// The order changed between firmware releases, so it is a table rather
/// than a constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    pub name: String,
    pub settings: Vec<ByteSetting>,
}

impl ConfigLayout {
    pub fn new(name: impl Into<String>, settings: Vec<ByteSetting>) -> Result<Self, ProtocolError> {
        if settings.len() > MAX_BYTE_SETTINGS {
            return Err(ProtocolError::ValueTooLong(CONFIG_FLOAT_BLOCK_LEN + settings.len()));
        }
        Ok(Self { name: name.into(), settings })
    }

    /// Early firmware: eight settings, no display timeout or address
    pub fn v1() -> Self {
        Self {
            name: "v1".to_string(),
            settings: vec![
                ByteSetting::OutputEnabled,
                ByteSetting::FanMode,
                ByteSetting::FanThreshold,
                ByteSetting::Buzzer,
                ByteSetting::Brightness,
                ByteSetting::KeyLock,
                ByteSetting::TemperatureUnit,
                ByteSetting::OutputOnBoot,
            ],
        }
    }

    /// Current firmware: all ten settings in tag order
    pub fn v2() -> Self {
        Self {
            name: "v2".to_string(),
            settings: ByteSetting::ALL.to_vec(),
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "v1" => Some(Self::v1()),
            "v2" => Some(Self::v2()),
            _ => None,
        }
    }

    /// Size of a complete bundle value for this layout
    pub fn value_len(&self) -> usize {
        CONFIG_FLOAT_BLOCK_LEN + self.settings.len()
    }
}

impl Default for ConfigLayout {
    fn default() -> Self {
        Self::v2()
    }
}

/// Snapshot of the persistent configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigBundle {
    pub voltage_setpoint: f32,
    pub current_limit: f32,
    pub over_voltage: f32,
    pub over_current: f32,
    pub over_temperature: f32,
    /// Byte settings present in the bundle, in wire order
    pub settings: Vec<(ByteSetting, u8)>,
}

impl ConfigBundle {
    /// Decode using `layout`; settings beyond the end of `value` are left out.
    pub fn decode(value: &[u8], layout: &ConfigLayout) -> Result<Self, ProtocolError> {
        if value.len() < CONFIG_FLOAT_BLOCK_LEN {
            return Err(ProtocolError::ValueTooShort {
                expected: CONFIG_FLOAT_BLOCK_LEN,
                actual: value.len(),
            });
        }
        let settings = layout
            .settings
            .iter()
            .zip(&value[CONFIG_FLOAT_BLOCK_LEN..])
            .map(|(s, b)| (*s, *b))
            .collect();

        Ok(Self {
            voltage_setpoint: f32_at(value, 0),
            current_limit: f32_at(value, 1),
            over_voltage: f32_at(value, 2),
            over_current: f32_at(value, 3),
            over_temperature: f32_at(value, 4),
            settings,
        })
    }

    pub fn float(&self, setting: FloatSetting) -> f32 {
        match setting {
            FloatSetting::VoltageSetpoint => self.voltage_setpoint,
            FloatSetting::CurrentLimit => self.current_limit,
            FloatSetting::OverVoltage => self.over_voltage,
            FloatSetting::OverCurrent => self.over_current,
            FloatSetting::OverTemperature => self.over_temperature,
        }
    }

    pub fn set_float(&mut self, setting: FloatSetting, value: f32) {
        match setting {
            FloatSetting::VoltageSetpoint => self.voltage_setpoint = value,
            FloatSetting::CurrentLimit => self.current_limit = value,
            FloatSetting::OverVoltage => self.over_voltage = value,
            FloatSetting::OverCurrent => self.over_current = value,
            FloatSetting::OverTemperature => self.over_temperature = value,
        }
    }

    pub fn byte(&self, setting: ByteSetting) -> Option<u8> {
        self.settings.iter().find(|(s, _)| *s == setting).map(|(_, v)| *v)
    }

    /// Encode in `layout` order; settings missing from the bundle are written as 0.
    pub fn to_bytes(&self, layout: &ConfigLayout) -> Vec<u8> {
        let mut buf: Vec<u8> = FloatSetting::ALL
            .iter()
            .flat_map(|s| self.float(*s).to_le_bytes())
            .collect();
        buf.extend(layout.settings.iter().map(|s| self.byte(*s).unwrap_or(0)));
        buf
    }
}
