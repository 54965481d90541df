//! Core types and traits for the driver collaborator.
//!
//! [`SerialDriver`] and [`DeviceHandle`] describe the primitive operations a
//! native serial library provides. The session layer is written purely in
//! terms of these traits, so the host driver and the in-memory mock are
//! interchangeable.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Largest buffer accepted by a single transfer (driver counts are 32-bit signed).
pub const MAX_TRANSFER_LEN: usize = i32::MAX as usize;

/// Line configuration of a serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Baud rate (bits per second), always positive.
    pub baud_rate: u32,

    /// Number of data bits per character.
    pub data_bits: DataBits,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Flow control mode.
    pub flow_control: FlowControl,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl PortConfig {
    /// Build a configuration from raw line parameters, validating each one.
    pub fn from_raw(
        baud_rate: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: Parity,
        flow_control: FlowControl,
    ) -> Result<Self, PortError> {
        let config = Self {
            baud_rate,
            data_bits: DataBits::try_from(data_bits)?,
            stop_bits: StopBits::try_from(stop_bits)?,
            parity,
            flow_control,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the enums cannot express.
    pub fn validate(&self) -> Result<(), PortError> {
        if self.baud_rate == 0 {
            return Err(PortError::invalid_argument("baud rate must be positive"));
        }
        Ok(())
    }
}

impl fmt::Display for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{} flow={}",
            self.baud_rate,
            u8::from(self.data_bits),
            self.parity.code(),
            u8::from(self.stop_bits),
            self.flow_control
        )
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
    Nine,
}

impl TryFrom<u8> for DataBits {
    type Error = PortError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            9 => Ok(Self::Nine),
            other => Err(PortError::invalid_argument(format!(
                "data bits must be between 5 and 9, got {other}"
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
            DataBits::Nine => 9,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = PortError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(PortError::invalid_argument(format!(
                "stop bits must be 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Single-letter code used in "8N1" style notation.
    pub fn code(self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
            Self::Mark => 'M',
            Self::Space => 'S',
        }
    }
}

impl FromStr for Parity {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            "mark" | "m" => Ok(Self::Mark),
            "space" | "s" => Ok(Self::Space),
            other => Err(PortError::invalid_argument(format!("unknown parity '{other}'"))),
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    #[default]
    None,
    RtsCts,
    XonXoff,
    DtrDsr,
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::RtsCts => "rts/cts",
            Self::XonXoff => "xon/xoff",
            Self::DtrDsr => "dtr/dsr",
        };
        f.write_str(name)
    }
}

impl FromStr for FlowControl {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', '/'], "").as_str() {
            "none" => Ok(Self::None),
            "rtscts" | "hardware" => Ok(Self::RtsCts),
            "xonxoff" | "software" => Ok(Self::XonXoff),
            "dtrdsr" => Ok(Self::DtrDsr),
            _ => Err(PortError::invalid_argument(format!(
                "unknown flow control '{s}'"
            ))),
        }
    }
}

/// Driver-side buffers targeted by a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTarget {
    Input,
    Output,
    Both,
}

/// How a read or write waits for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Wait for the full transfer, bounded by the timeout.
    Blocking,
    /// Transfer only what the driver can handle immediately.
    NonBlocking,
}

/// Convert a millisecond timeout to the driver form, where `0` means "no limit".
pub fn timeout_from_ms(timeout_ms: u32) -> Option<Duration> {
    (timeout_ms > 0).then(|| Duration::from_millis(u64::from(timeout_ms)))
}

/// Host-side entry point of a serial library: enumeration and open-by-name.
pub trait SerialDriver: Send + Sync + fmt::Debug {
    /// Names of all currently visible serial devices, in driver order.
    fn enumerate_ports(&self) -> Result<Vec<String>, PortError>;

    /// Resolve `name` and open it for reading and writing.
    ///
    /// The returned handle must leave the device's line settings as they were
    /// before the call, so the caller can snapshot them.
    fn open_by_name(&self, name: &str) -> Result<Box<dyn DeviceHandle>, PortError>;
}

/// Primitive operations on one open device.
///
/// Every method other than [`DeviceHandle::name`] fails with
/// [`PortError::NotOpen`] once [`DeviceHandle::close`] has run.
pub trait DeviceHandle: Send + fmt::Debug {
    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Read back the device's active line configuration.
    fn get_config(&self) -> Result<PortConfig, PortError>;

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError>;
    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), PortError>;
    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), PortError>;
    fn set_parity(&mut self, parity: Parity) -> Result<(), PortError>;
    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError>;

    /// Apply a full configuration snapshot.
    ///
    /// The default applies each field in turn and stops at the first failure.
    fn set_config(&mut self, config: &PortConfig) -> Result<(), PortError> {
        self.set_baud_rate(config.baud_rate)?;
        self.set_data_bits(config.data_bits)?;
        self.set_parity(config.parity)?;
        self.set_stop_bits(config.stop_bits)?;
        self.set_flow_control(config.flow_control)
    }

    /// Put back the configuration the device had when it was opened.
    ///
    /// Drivers that kept a fuller snapshot of the pre-open state write that
    /// instead when `prior` still describes it.
    fn restore(&mut self, prior: &PortConfig) -> Result<(), PortError> {
        self.set_config(prior)
    }

    /// Read until `buffer` is full or `timeout` elapses (`None` waits forever).
    ///
    /// A short count on timeout is not an error.
    fn blocking_read(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, PortError>;

    /// Write all of `data` unless `timeout` elapses first (`None` waits forever).
    fn blocking_write(&mut self, data: &[u8], timeout: Option<Duration>)
        -> Result<usize, PortError>;

    /// Read whatever is immediately available, without waiting.
    fn nonblocking_read(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Write as much as the driver accepts immediately.
    fn nonblocking_write(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Bytes received and not yet read.
    fn input_waiting(&self) -> Result<usize, PortError>;

    /// Bytes queued and not yet transmitted.
    fn output_waiting(&self) -> Result<usize, PortError>;

    /// Discard buffered input and/or output.
    fn flush(&mut self, target: FlushTarget) -> Result<(), PortError>;

    /// Block until queued output has been transmitted.
    fn drain(&mut self) -> Result<(), PortError>;

    /// Release the OS resource.
    fn close(&mut self) -> Result<(), PortError>;
}
