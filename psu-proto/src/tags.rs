//! Tag table of the PSU telemetry protocol.
//!
//! Every request carries exactly one tag. Reads and commands have an empty
//! value; writes carry a little-endian f32 or a single byte.

use std::fmt;
use std::str::FromStr;

/// Telemetry bundle (6 × f32)
pub const TAG_TELEMETRY: u8 = 0x01;

/// Config bundle (5 × f32 followed by byte settings)
pub const TAG_CONFIG: u8 = 0x02;

/// Write/command accepted
pub const TAG_OK: u8 = 0xF0;

/// Request rejected, value holds one error code byte
pub const TAG_ERROR: u8 = 0xFF;

/// Read-only live measurements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    Voltage,
    Current,
    Power,
    InletTemp,
    InternalTemp,
    Energy,
}

impl Measurement {
    pub const ALL: [Measurement; 6] = [
        Measurement::Voltage,
        Measurement::Current,
        Measurement::Power,
        Measurement::InletTemp,
        Measurement::InternalTemp,
        Measurement::Energy,
    ];

    pub fn tag(self) -> u8 {
        match self {
            Measurement::Voltage => 0x03,
            Measurement::Current => 0x04,
            Measurement::Power => 0x05,
            Measurement::InletTemp => 0x06,
            Measurement::InternalTemp => 0x07,
            Measurement::Energy => 0x08,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Measurement::Voltage => "voltage",
            Measurement::Current => "current",
            Measurement::Power => "power",
            Measurement::InletTemp => "inlet-temp",
            Measurement::InternalTemp => "internal-temp",
            Measurement::Energy => "energy",
        }
    }
}

/// Writable float settings, in config bundle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatSetting {
    VoltageSetpoint,
    CurrentLimit,
    OverVoltage,
    OverCurrent,
    OverTemperature,
}

impl FloatSetting {
    pub const ALL: [FloatSetting; 5] = [
        FloatSetting::VoltageSetpoint,
        FloatSetting::CurrentLimit,
        FloatSetting::OverVoltage,
        FloatSetting::OverCurrent,
        FloatSetting::OverTemperature,
    ];

    pub fn tag(self) -> u8 {
        match self {
            FloatSetting::VoltageSetpoint => 0x10,
            FloatSetting::CurrentLimit => 0x11,
            FloatSetting::OverVoltage => 0x12,
            FloatSetting::OverCurrent => 0x13,
            FloatSetting::OverTemperature => 0x14,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FloatSetting::VoltageSetpoint => "voltage-setpoint",
            FloatSetting::CurrentLimit => "current-limit",
            FloatSetting::OverVoltage => "ovp",
            FloatSetting::OverCurrent => "ocp",
            FloatSetting::OverTemperature => "otp",
        }
    }
}

/// Writable single-byte settings
///
/// Their position inside the config bundle depends on the firmware
/// version, see [`crate::ConfigLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteSetting {
    OutputEnabled,
    OutputOnBoot,
    FanMode,
    FanThreshold,
    Buzzer,
    Brightness,
    DisplayTimeout,
    KeyLock,
    TemperatureUnit,
    DeviceAddress,
}

impl ByteSetting {
    pub const ALL: [ByteSetting; 10] = [
        ByteSetting::OutputEnabled,
        ByteSetting::OutputOnBoot,
        ByteSetting::FanMode,
        ByteSetting::FanThreshold,
        ByteSetting::Buzzer,
        ByteSetting::Brightness,
        ByteSetting::DisplayTimeout,
        ByteSetting::KeyLock,
        ByteSetting::TemperatureUnit,
        ByteSetting::DeviceAddress,
    ];

    pub fn tag(self) -> u8 {
        match self {
            ByteSetting::OutputEnabled => 0x20,
            ByteSetting::OutputOnBoot => 0x21,
            ByteSetting::FanMode => 0x22,
            ByteSetting::FanThreshold => 0x23,
            ByteSetting::Buzzer => 0x24,
            ByteSetting::Brightness => 0x25,
            ByteSetting::DisplayTimeout => 0x26,
            ByteSetting::KeyLock => 0x27,
            ByteSetting::TemperatureUnit => 0x28,
            ByteSetting::DeviceAddress => 0x29,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ByteSetting::OutputEnabled => "output",
            ByteSetting::OutputOnBoot => "output-on-boot",
            ByteSetting::FanMode => "fan-mode",
            ByteSetting::FanThreshold => "fan-threshold",
            ByteSetting::Buzzer => "buzzer",
            ByteSetting::Brightness => "brightness",
            ByteSetting::DisplayTimeout => "display-timeout",
            ByteSetting::KeyLock => "key-lock",
            ByteSetting::TemperatureUnit => "temp-unit",
            ByteSetting::DeviceAddress => "address",
        }
    }
}

/// Zero-length commands, identified by tag alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    OutputOn,
    OutputOff,
    ResetEnergy,
    Reboot,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::OutputOn,
        Command::OutputOff,
        Command::ResetEnergy,
        Command::Reboot,
    ];

    pub fn tag(self) -> u8 {
        match self {
            Command::OutputOn => 0x30,
            Command::OutputOff => 0x31,
            Command::ResetEnergy => 0x32,
            Command::Reboot => 0x33,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::OutputOn => "output-on",
            Command::OutputOff => "output-off",
            Command::ResetEnergy => "reset-energy",
            Command::Reboot => "reboot",
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown command: {s}"))
    }
}

/// Any single-tag readable field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Measurement(Measurement),
    Float(FloatSetting),
    Byte(ByteSetting),
}

impl Field {
    pub fn tag(self) -> u8 {
        match self {
            Field::Measurement(m) => m.tag(),
            Field::Float(s) => s.tag(),
            Field::Byte(s) => s.tag(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Measurement(m) => m.name(),
            Field::Float(s) => s.name(),
            Field::Byte(s) => s.name(),
        }
    }

    /// Iterate every field in tag order
    pub fn all() -> impl Iterator<Item = Field> {
        Measurement::ALL
            .into_iter()
            .map(Field::Measurement)
            .chain(FloatSetting::ALL.into_iter().map(Field::Float))
            .chain(ByteSetting::ALL.into_iter().map(Field::Byte))
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::all()
            .find(|f| f.name() == s)
            .ok_or_else(|| format!("unknown field: {s}"))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
