use anyhow::{anyhow, bail, ensure, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use strum::EnumIter;

/// Lowest and highest addressable slave on a shared RTU bus.
pub const UNIT_ID_MIN: u8 = 1;
pub const UNIT_ID_MAX: u8 = 247;

/// Default response timeout used by the serial worker.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// The four Modbus data tables.
#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// Single-bit read/write
    Coils,
    /// Single-bit read-only
    DiscreteInputs,
    /// 16-bit read-only
    InputRegisters,
    /// 16-bit read/write
    HoldingRegisters,
}

impl RegisterKind {
    pub const fn all() -> &'static [RegisterKind] {
        &[
            Self::Coils,
            Self::DiscreteInputs,
            Self::InputRegisters,
            Self::HoldingRegisters,
        ]
    }

    /// Whether values of this kind are single bits (carried as 0/1).
    pub const fn is_bit(self) -> bool {
        matches!(self, Self::Coils | Self::DiscreteInputs)
    }

    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Coils | Self::HoldingRegisters)
    }

    pub const fn max_read_count(self) -> u16 {
        if self.is_bit() {
            2000
        } else {
            125
        }
    }

    pub const fn max_write_count(self) -> u16 {
        if self.is_bit() {
            1968
        } else {
            123
        }
    }

    /// Short label used in logs and table headers.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Coils => "coils",
            Self::DiscreteInputs => "discrete inputs",
            Self::InputRegisters => "input registers",
            Self::HoldingRegisters => "holding registers",
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RegisterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coil" | "coils" | "c" => Ok(Self::Coils),
            "discrete" | "discretes" | "discrete_inputs" | "di" => Ok(Self::DiscreteInputs),
            "input" | "inputs" | "input_registers" | "ir" => Ok(Self::InputRegisters),
            "holding" | "holdings" | "holding_registers" | "hr" => Ok(Self::HoldingRegisters),
            other => Err(anyhow!(
                "Unknown register kind '{other}' (expected coils, discrete, input or holding)"
            )),
        }
    }
}

/// Baud rates offered by the connection dialog.
#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B1200,
    B2400,
    B4800,
    #[default]
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B1200 => 1200u32,
            BaudRate::B2400 => 2400u32,
            BaudRate::B4800 => 4800u32,
            BaudRate::B9600 => 9600u32,
            BaudRate::B19200 => 19200u32,
            BaudRate::B38400 => 38400u32,
            BaudRate::B57600 => 57600u32,
            BaudRate::B115200 => 115200u32,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = anyhow::Error;

    fn try_from(v: u32) -> Result<Self> {
        Ok(match v {
            1200 => BaudRate::B1200,
            2400 => BaudRate::B2400,
            4800 => BaudRate::B4800,
            9600 => BaudRate::B9600,
            19200 => BaudRate::B19200,
            38400 => BaudRate::B38400,
            57600 => BaudRate::B57600,
            115200 => BaudRate::B115200,
            other => bail!("Unsupported baud rate {other}"),
        })
    }
}

impl From<BaudRate> for u32 {
    fn from(b: BaudRate) -> u32 {
        b.as_u32()
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    pub fn as_u8(self) -> u8 {
        match self {
            DataBits::Five => 5u8,
            DataBits::Six => 6u8,
            DataBits::Seven => 7u8,
            DataBits::Eight => 8u8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => bail!("Data bits must be 5-8, got {other}"),
        })
    }
}

impl From<DataBits> for u8 {
    fn from(d: DataBits) -> u8 {
        d.as_u8()
    }
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Space,
    Mark,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::None => write!(f, "None"),
            Parity::Even => write!(f, "Even"),
            Parity::Odd => write!(f, "Odd"),
            Parity::Space => write!(f, "Space"),
            Parity::Mark => write!(f, "Mark"),
        }
    }
}

impl FromStr for Parity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "even" | "e" => Ok(Parity::Even),
            "odd" | "o" => Ok(Parity::Odd),
            "space" | "s" => Ok(Parity::Space),
            "mark" | "m" => Ok(Parity::Mark),
            other => Err(anyhow!("Unknown parity '{other}'")),
        }
    }
}

#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OneAndHalf,
    #[serde(rename = "2")]
    Two,
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OneAndHalf => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}

impl FromStr for StopBits {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1" => Ok(StopBits::One),
            "1.5" => Ok(StopBits::OneAndHalf),
            "2" => Ok(StopBits::Two),
            other => Err(anyhow!("Stop bits must be 1, 1.5 or 2, got '{other}'")),
        }
    }
}

/// Serial link and slave addressing for one connection attempt.
///
/// Built once (from the command line or a config file), handed to
/// [`crate::api::connection::ModbusConnection::connect`] and not kept
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub port_name: String,
    #[serde(default)]
    pub baud_rate: BaudRate,
    #[serde(default)]
    pub data_bits: DataBits,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ConnectionConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: BaudRate::default(),
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Range checks only; nothing here knows what the device supports.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.port_name.trim().is_empty(), "Port name is empty");
        ensure!(
            (UNIT_ID_MIN..=UNIT_ID_MAX).contains(&self.unit_id),
            "Unit id must be {UNIT_ID_MIN}-{UNIT_ID_MAX}, got {}",
            self.unit_id
        );
        ensure!(self.timeout_ms > 0, "Timeout must be positive");
        Ok(())
    }

    /// Parse a config file; `.toml` files go through `toml`, anything else is JSON.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| anyhow!("Failed to read config {}: {err}", path.display()))?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|err| anyhow!("Invalid TOML config {}: {err}", path.display()))?,
            _ => serde_json::from_str(&content)
                .map_err(|err| anyhow!("Invalid JSON config {}: {err}", path.display()))?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Decoded payload of a settled reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataUnit {
    pub kind: RegisterKind,
    pub start_address: u16,
    /// Bit kinds carry 0/1.
    pub values: Vec<u16>,
}

impl DataUnit {
    pub fn new(kind: RegisterKind, start_address: u16, values: Vec<u16>) -> Self {
        Self {
            kind,
            start_address,
            values,
        }
    }

    pub fn from_bits(kind: RegisterKind, start_address: u16, bits: &[bool]) -> Self {
        Self::new(kind, start_address, bits.iter().map(|b| *b as u16).collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn bits(&self) -> Vec<bool> {
        self.values.iter().map(|v| *v != 0).collect()
    }

    /// `(address, value)` pairs, contiguous from `start_address`.
    pub fn rows(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, v)| (self.start_address.wrapping_add(i as u16), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn register_kind_capabilities() {
        assert!(RegisterKind::Coils.is_bit() && RegisterKind::Coils.is_writable());
        assert!(RegisterKind::DiscreteInputs.is_bit());
        assert!(!RegisterKind::DiscreteInputs.is_writable());
        assert!(!RegisterKind::InputRegisters.is_writable());
        assert!(RegisterKind::HoldingRegisters.is_writable());
        assert_eq!(RegisterKind::HoldingRegisters.max_read_count(), 125);
    }

    #[test]
    fn register_kind_parses_short_forms() {
        assert_eq!("hr".parse::<RegisterKind>().unwrap(), RegisterKind::HoldingRegisters);
        assert_eq!("Discrete".parse::<RegisterKind>().unwrap(), RegisterKind::DiscreteInputs);
        assert!("analog".parse::<RegisterKind>().is_err());
    }

    #[test]
    fn baud_rates_round_trip_through_u32() {
        for baud in BaudRate::iter() {
            assert_eq!(BaudRate::try_from(baud.as_u32()).unwrap(), baud);
        }
        assert!(BaudRate::try_from(14400).is_err());
    }

    #[test]
    fn config_validation_checks_unit_range() {
        let mut config = ConnectionConfig::new("/dev/ttyUSB0");
        assert!(config.validate().is_ok());
        config.unit_id = 0;
        assert!(config.validate().is_err());
        config.unit_id = 248;
        assert!(config.validate().is_err());
        config.unit_id = 247;
        config.port_name = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_json_fills_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"port_name":"COM3","baud_rate":19200,"stop_bits":"1.5"}"#)
                .unwrap();
        assert_eq!(config.baud_rate, BaudRate::B19200);
        assert_eq!(config.stop_bits, StopBits::OneAndHalf);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);

        let bad = serde_json::from_str::<ConnectionConfig>(r#"{"port_name":"COM3","baud_rate":7}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn config_toml_parses() {
        let config: ConnectionConfig = toml::from_str(
            "port_name = \"/dev/ttyS1\"\nbaud_rate = 115200\nparity = \"even\"\nunit_id = 17\n",
        )
        .unwrap();
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.unit_id, 17);
    }

    #[test]
    fn data_unit_rows_are_contiguous() {
        let unit = DataUnit::from_bits(RegisterKind::Coils, 100, &[true, false, true]);
        let rows: Vec<_> = unit.rows().collect();
        assert_eq!(rows, vec![(100, 1), (101, 0), (102, 1)]);
        assert_eq!(unit.bits(), vec![true, false, true]);
    }
}
