//! Sub-device adapters for the Sutter Lambda controller family.
//!
//! Each adapter turns property changes into command bytes and hands them to
//! the shared [`LambdaHub`], which owns the port and the command engine. The
//! adapters keep their own cached parameter state and only update it after an
//! exchange completed, so a failed set leaves the reported value unchanged.

pub mod dg4;
pub mod hub;
pub mod shutter;
pub mod tunable_filter;
pub mod wheel;

pub use dg4::{Dg4Gate, Dg4Shutter, Dg4Wheel, DG4_POSITIONS};
pub use hub::{ControllerInfo, ControllerType, HubOptions, LambdaHub, STATUS_MAX_LEN};
pub use shutter::{Shutter, ShutterId, ShutterMode, ShutterStatus};
pub use tunable_filter::{LambdaVf5, TtlConfig};
pub use wheel::{FilterWheel, WheelId};

use crate::error::{DeviceError, DeviceResult};
use crate::protocol::ProtocolResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Property names shared by the adapters.
pub mod keywords {
    pub const STATE: &str = "State";
    pub const SPEED: &str = "Speed";
    pub const CLOSED_POSITION: &str = "ClosedPosition";
    pub const BUSY: &str = "Busy";
    pub const DELAY: &str = "Delay";
    pub const MODE: &str = "Mode";
    pub const ND_SETTING: &str = "NDSetting";
    pub const WAVELENGTH: &str = "Wavelength";
    pub const WHITE_LIGHT_MODE: &str = "WhiteLightMode";
    pub const WHEEL_TILT: &str = "WheelTilt";
    pub const CONTROLLER_INFO: &str = "ControllerInfo";
    pub const ANSWER_TIMEOUT: &str = "AnswerTimeout";
}

/// A value crossing the host property boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    /// Interpret user input: integers first, then floats, otherwise text.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            Self::Integer(value)
        } else if let Ok(value) = trimmed.parse::<f64>() {
            Self::Float(value)
        } else {
            Self::Text(trimmed.to_string())
        }
    }

    /// The value as an integer, for `property`.
    pub fn as_integer(&self, property: &str) -> DeviceResult<i64> {
        match self {
            Self::Integer(value) => Ok(*value),
            Self::Float(value) if value.fract() == 0.0 => Ok(*value as i64),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| DeviceError::invalid_value(property, format!("\"{text}\" is not an integer"))),
            Self::Float(value) => Err(DeviceError::invalid_value(
                property,
                format!("{value} is not an integer"),
            )),
        }
    }

    /// The value as a float, for `property`.
    pub fn as_float(&self, property: &str) -> DeviceResult<f64> {
        match self {
            Self::Integer(value) => Ok(*value as f64),
            Self::Float(value) => Ok(*value),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| DeviceError::invalid_value(property, format!("\"{text}\" is not a number"))),
        }
    }

    /// The value as a boolean; accepts 0/1 and the usual words.
    pub fn as_bool(&self, property: &str) -> DeviceResult<bool> {
        match self {
            Self::Integer(0) => Ok(false),
            Self::Integer(1) => Ok(true),
            Self::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "off" | "closed" => Ok(false),
                "1" | "true" | "on" | "open" => Ok(true),
                _ => Err(DeviceError::invalid_value(property, format!("\"{text}\" is not a boolean"))),
            },
            other => Err(DeviceError::invalid_value(property, format!("{other} is not 0 or 1"))),
        }
    }

    /// The value as a duration given in milliseconds, for `property`.
    ///
    /// Zero is accepted only with `allow_zero`; values too large for a
    /// `Duration` are rejected rather than saturated.
    pub fn as_millis(&self, property: &str, allow_zero: bool) -> DeviceResult<Duration> {
        let ms = self.as_float(property)?;
        if ms.is_nan() || ms < 0.0 || (!allow_zero && ms == 0.0) {
            let expected = if allow_zero { "non-negative" } else { "positive" };
            return Err(DeviceError::invalid_value(
                property,
                format!("must be a {expected} number of milliseconds"),
            ));
        }
        Duration::try_from_secs_f64(ms / 1000.0)
            .map_err(|_| DeviceError::invalid_value(property, format!("{ms} ms is out of range")))
    }

    /// The value rendered as text.
    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The host property layer's view of an adapter.
///
/// On error the previously reported value of the property is unchanged.
pub trait SubDevice: Send + Sync {
    /// Device label, e.g. "Wheel-A".
    fn name(&self) -> &str;

    /// Properties this device answers to.
    fn property_names(&self) -> Vec<&'static str>;

    fn get_property(&self, name: &str) -> DeviceResult<PropertyValue>;

    fn set_property(&self, name: &str, value: PropertyValue) -> DeviceResult<()>;

    /// Whether the device is moving or a command is in flight.
    fn busy(&self) -> bool;
}

/// How adapters react to a failed exchange.
///
/// Only [`crate::protocol::ProtocolError::is_retryable`] failures are re-issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub echo_timeout_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            echo_timeout_retries: 1,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub const NONE: RetryPolicy = RetryPolicy {
        echo_timeout_retries: 0,
    };

    /// Run `attempt` until it succeeds, fails for good, or retries run out.
    pub fn run<F>(&self, mut attempt: F) -> ProtocolResult
    where
        F: FnMut() -> ProtocolResult,
    {
        let mut retries = 0;
        loop {
            match attempt() {
                Err(e) if e.is_retryable() && retries < self.echo_timeout_retries => {
                    retries += 1;
                    tracing::debug!(retry = retries, "re-issuing command after {e}");
                }
                other => return other,
            }
        }
    }
}

pub(crate) fn unknown(name: &str) -> DeviceError {
    DeviceError::UnknownProperty(name.to_string())
}

pub(crate) fn read_only(name: &str) -> DeviceError {
    DeviceError::ReadOnlyProperty(name.to_string())
}
