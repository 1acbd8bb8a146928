//! Port-specific error types.
//!
//! Transport failures are kept separate from protocol failures: the command
//! engine wraps any of these into `ProtocolError::Transport` and never retries.

use thiserror::Error;

/// Errors that can occur during serial port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The port has not been opened on this transport.
    #[error("Serial port is not open: {0}")]
    NotOpen(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a NotOpen error from a port name.
    pub fn not_open(port_name: impl Into<String>) -> Self {
        Self::NotOpen(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PortError::not_found("/dev/ttyUSB0");
        assert_eq!(err.to_string(), "Serial port not found: /dev/ttyUSB0");

        let err = PortError::not_open("COM3");
        assert_eq!(err.to_string(), "Serial port is not open: COM3");

        let err = PortError::config("Invalid baud rate");
        assert_eq!(err.to_string(), "Configuration error: Invalid baud rate");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        let err: PortError = io.into();
        assert!(matches!(err, PortError::Io(_)));
        assert!(err.to_string().contains("unplugged"));
    }
}
