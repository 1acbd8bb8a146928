//! Synchronous serial transport.
//!
//! Wraps the `serialport` crate's `SerialPort` handles behind the `Transport`
//! trait. One `SerialPortTransport` can hold any number of open ports, keyed by
//! `PortId`, much like a host framework's serial manager.

use super::error::PortError;
use super::traits::{PortConfiguration, PortId, Transport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

type SharedHandle = Arc<Mutex<Box<dyn serialport::SerialPort>>>;

/// Serial transport backed by `serialport`.
#[derive(Default)]
pub struct SerialPortTransport {
    ports: Mutex<HashMap<PortId, SharedHandle>>,
}

impl SerialPortTransport {
    /// Create a transport with no open ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a serial port with the given configuration and register it.
    ///
    /// Opening a port that is already open on this transport is a no-op.
    ///
    /// # Example
    /// ```no_run
    /// use lambda_link::port::{PortConfiguration, PortId, SerialPortTransport};
    ///
    /// let transport = SerialPortTransport::new();
    /// transport.open(&PortId::new("/dev/ttyUSB0"), &PortConfiguration::default())?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(&self, port: &PortId, config: &PortConfiguration) -> Result<(), PortError> {
        let mut ports = self.ports.lock();
        if ports.contains_key(port) {
            return Ok(());
        }

        let handle = serialport::new(port.as_str(), config.baud_rate)
            .data_bits(config.data_bits.into())
            .flow_control(config.flow_control.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(config.timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => PortError::not_found(port.as_str()),
                serialport::ErrorKind::InvalidInput => PortError::config(e.to_string()),
                _ => PortError::Serial(e),
            })?;

        debug!(port = %port, baud = config.baud_rate, "serial port opened");
        ports.insert(port.clone(), Arc::new(Mutex::new(handle)));
        Ok(())
    }

    /// Close a port. Closing a port that is not open is a no-op.
    pub fn close(&self, port: &PortId) {
        if self.ports.lock().remove(port).is_some() {
            debug!(port = %port, "serial port closed");
        }
    }

    /// Whether `port` is currently open on this transport.
    pub fn is_open(&self, port: &PortId) -> bool {
        self.ports.lock().contains_key(port)
    }

    fn handle(&self, port: &PortId) -> Result<SharedHandle, PortError> {
        self.ports
            .lock()
            .get(port)
            .cloned()
            .ok_or_else(|| PortError::not_open(port.as_str()))
    }
}

impl Transport for SerialPortTransport {
    fn write(&self, port: &PortId, data: &[u8]) -> Result<(), PortError> {
        let handle = self.handle(port)?;
        let mut handle = handle.lock();
        handle.write_all(data)?;
        handle.flush()?;
        Ok(())
    }

    fn read_byte(&self, port: &PortId, timeout: Duration) -> Result<Option<u8>, PortError> {
        let handle = self.handle(port)?;
        let mut handle = handle.lock();
        handle.set_timeout(timeout)?;

        let mut byte = [0u8; 1];
        match handle.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => {
                trace!(port = %port, byte = byte[0], "rx");
                Ok(Some(byte[0]))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(PortError::Io(e)),
        }
    }

    fn purge(&self, port: &PortId) -> Result<(), PortError> {
        let handle = self.handle(port)?;
        let handle = handle.lock();
        handle
            .clear(serialport::ClearBuffer::All)
            .map_err(PortError::Serial)
    }
}

impl std::fmt::Debug for SerialPortTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ports: Vec<String> = self.ports.lock().keys().map(ToString::to_string).collect();
        f.debug_struct("SerialPortTransport")
            .field("ports", &ports)
            .finish()
    }
}

/// Names of the serial ports present on this system.
pub fn available_port_names() -> Result<Vec<String>, PortError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_not_found_error() {
        let transport = SerialPortTransport::new();
        let port = PortId::new("/dev/nonexistent_port_12345");
        let result = transport.open(&port, &PortConfiguration::default());

        assert!(result.is_err());
        assert!(!transport.is_open(&port));
    }

    #[test]
    fn test_io_on_unopened_port_is_not_open() {
        let transport = SerialPortTransport::new();
        let port = PortId::new("COM250");

        match transport.write(&port, &[0xEE]) {
            Err(PortError::NotOpen(name)) => assert_eq!(name, "COM250"),
            other => panic!("Expected NotOpen error, got: {:?}", other),
        }
        assert!(matches!(transport.purge(&port), Err(PortError::NotOpen(_))));
        assert!(matches!(
            transport.read_byte(&port, Duration::from_millis(1)),
            Err(PortError::NotOpen(_))
        ));
    }

    #[test]
    fn test_close_unopened_port_is_noop() {
        let transport = SerialPortTransport::new();
        transport.close(&PortId::new("COM9"));
        assert!(format!("{:?}", transport).contains("SerialPortTransport"));
    }
}
