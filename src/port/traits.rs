//! Core traits for the byte transport beneath the command engine.
//!
//! Defines the `Transport` trait that allows real serial ports, vendor SDK
//! handles and mock implementations to be used interchangeably, plus the
//! `PortId` that names one physical endpoint.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of one physical serial endpoint (e.g. "COM3" or "/dev/ttyUSB0").
///
/// Several logical sub-devices may share the same `PortId`; the registry hands
/// all of them the same lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(Arc<str>);

impl PortId {
    /// Create a port identifier from a name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The port name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PortId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl AsRef<str> for PortId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Configuration parameters for a serial port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfiguration {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Timeout applied when the port is opened; `read_byte` overrides it per call.
    pub timeout: Duration,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        // Lambda 10-2/10-3/SC controllers talk 9600 8N1 without handshaking.
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Byte-oriented duplex channel to one or more named serial endpoints.
///
/// Every call names the port it addresses, so one transport can serve all the
/// ports of a process. Implementations must be internally synchronized; the
/// command engine guarantees that at most one command is in flight per port,
/// but different ports may be driven from different threads at once.
///
/// Vendor SDK handles (AOTF library, NKT, CyAPI) plug in by implementing this
/// trait on top of their own read/write calls.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Write `data` to the port as one contiguous write.
    fn write(&self, port: &PortId, data: &[u8]) -> Result<(), PortError>;

    /// Read a single byte, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn read_byte(&self, port: &PortId, timeout: Duration) -> Result<Option<u8>, PortError>;

    /// Discard any bytes sitting in the receive (and transmit) buffers.
    fn purge(&self, port: &PortId) -> Result<(), PortError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn write(&self, port: &PortId, data: &[u8]) -> Result<(), PortError> {
        (**self).write(port, data)
    }

    fn read_byte(&self, port: &PortId, timeout: Duration) -> Result<Option<u8>, PortError> {
        (**self).read_byte(port, timeout)
    }

    fn purge(&self, port: &PortId) -> Result<(), PortError> {
        (**self).purge(port)
    }
}
