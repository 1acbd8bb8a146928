//! Adapter-level error handling.
//!
//! `DeviceError` is what sub-device adapters return to the host property
//! layer. Its `Display` output is for logs; [`DeviceError::user_message`] is
//! the stable text shown to end users and never contains raw bytes.

use crate::port::{PortError, PortId};
use crate::protocol::ProtocolError;
use thiserror::Error;

/// A specialized `Result` type for adapter operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failure to bring a controller online.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The port opened but the controller never acknowledged go-online.
    #[error("no answer from controller on {port} after {attempts} attempt(s)")]
    NoAnswer { port: PortId, attempts: u32 },

    /// The serial port itself could not be opened.
    #[error("failed to open {port}: {source}")]
    Open {
        port: PortId,
        #[source]
        source: PortError,
    },
}

/// Errors reported by sub-device adapters.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("position {position} out of range (0..={max})")]
    PositionOutOfRange { position: i64, max: u8 },

    #[error("speed {speed} out of range (0..={max})")]
    InvalidSpeed { speed: i64, max: u8 },

    #[error("invalid value for {property}: {message}")]
    InvalidValue { property: String, message: String },

    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error("property is read-only: {0}")]
    ReadOnlyProperty(String),

    #[error("{feature} is not supported by the {controller} controller")]
    UnsupportedByController {
        feature: &'static str,
        controller: String,
    },

    #[error("malformed response to {what}: {len} byte(s)")]
    MalformedResponse { what: &'static str, len: usize },
}

impl DeviceError {
    pub(crate) fn invalid_value(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            property: property.into(),
            message: message.into(),
        }
    }

    /// Message suitable for an end user, stable per failure kind.
    pub fn user_message(&self) -> String {
        match self {
            Self::Protocol(e) => match e {
                ProtocolError::InvalidCommand(_) => {
                    "Internal error: an invalid command was generated.".to_string()
                }
                ProtocolError::EchoTimeout { .. } => {
                    "The controller did not acknowledge the command. Check that it is powered and connected.".to_string()
                }
                ProtocolError::UnexpectedByte { .. } => {
                    "The controller acknowledged the command incorrectly. Check the serial settings.".to_string()
                }
                ProtocolError::PrematureTerminator { .. } => {
                    "The controller ended the command before acknowledging it completely.".to_string()
                }
                ProtocolError::CompletionTimeout { .. } => {
                    "The controller accepted the command but did not report completion in time.".to_string()
                }
                ProtocolError::Transport(_) => {
                    "Communication with the controller failed. The device may be disconnected.".to_string()
                }
            },
            Self::Connect(ConnectError::NoAnswer { port, .. }) => {
                format!("No Lambda controller answered on {port}.")
            }
            Self::Connect(ConnectError::Open { port, .. }) => {
                format!("Could not open serial port {port}.")
            }
            Self::PositionOutOfRange { max, .. } => {
                format!("Position must be between 0 and {max}.")
            }
            Self::InvalidSpeed { max, .. } => format!("Speed must be between 0 and {max}."),
            Self::InvalidValue { property, message } => format!("Invalid {property}: {message}."),
            Self::UnknownProperty(name) => format!("Unknown property \"{name}\"."),
            Self::ReadOnlyProperty(name) => format!("Property \"{name}\" is read-only."),
            Self::UnsupportedByController { feature, controller } => {
                format!("{feature} is not available on the {controller} controller.")
            }
            Self::MalformedResponse { what, .. } => {
                format!("The controller sent an unexpected reply to the {what} request.")
            }
        }
    }

    /// Whether the underlying cause is a transport failure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Protocol(ProtocolError::Transport(_)) | Self::Connect(ConnectError::Open { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_bytes() {
        let err = DeviceError::from(ProtocolError::UnexpectedByte {
            position: 0,
            byte: 0x42,
        });
        let message = err.user_message();
        assert!(!message.contains("0x42"));
        assert!(err.to_string().contains("0x42"));
    }

    #[test]
    fn test_user_message_is_stable_per_kind() {
        let a = DeviceError::from(ProtocolError::EchoTimeout { matched: 0 });
        let b = DeviceError::from(ProtocolError::EchoTimeout { matched: 3 });
        assert_eq!(a.user_message(), b.user_message());
    }

    #[test]
    fn test_connect_errors() {
        let err = DeviceError::from(ConnectError::NoAnswer {
            port: PortId::new("COM3"),
            attempts: 4,
        });
        assert_eq!(err.user_message(), "No Lambda controller answered on COM3.");
        assert!(!err.is_transport());

        let err = DeviceError::from(ConnectError::Open {
            port: PortId::new("COM3"),
            source: PortError::not_found("COM3"),
        });
        assert!(err.is_transport());
    }

    #[test]
    fn test_range_messages() {
        let err = DeviceError::PositionOutOfRange { position: 12, max: 9 };
        assert_eq!(err.to_string(), "position 12 out of range (0..=9)");
        assert_eq!(err.user_message(), "Position must be between 0 and 9.");
    }
}
