//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::devices::{ControllerType, HubOptions, RetryPolicy};
use crate::port::{DataBits, FlowControl, Parity, PortConfiguration, StopBits};
use crate::protocol::EngineOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line settings
    pub serial: SerialConfig,
    /// Command exchange timing
    pub protocol: ProtocolConfig,
    /// Controller connection
    pub hub: HubConfig,
    /// Per-wheel settings
    pub wheels: WheelsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::validation("serial.baud_rate", "must be greater than zero"));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::validation("serial.read_timeout_ms", "must be greater than zero"));
        }
        if self.protocol.answer_timeout_ms == 0 {
            return Err(ConfigError::validation("protocol.answer_timeout_ms", "must be greater than zero"));
        }
        if self.protocol.poll_interval_ms == 0 {
            return Err(ConfigError::validation("protocol.poll_interval_ms", "must be greater than zero"));
        }
        if self.protocol.go_online_attempts == 0 {
            return Err(ConfigError::validation("protocol.go_online_attempts", "must be at least 1"));
        }
        for (name, wheel) in self.wheels.iter() {
            if wheel.speed > 7 {
                return Err(ConfigError::validation(
                    format!("wheels.{name}.speed"),
                    format!("{} is outside 0..=7", wheel.speed),
                ));
            }
            if wheel.closed_position > 9 {
                return Err(ConfigError::validation(
                    format!("wheels.{name}.closed_position"),
                    format!("{} is outside 0..=9", wheel.closed_position),
                ));
            }
        }
        Ok(())
    }

    /// Hub options derived from the `[protocol]` and `[hub]` sections.
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            answer_timeout: self.protocol.answer_timeout(),
            go_online_attempts: self.protocol.go_online_attempts,
            retry: RetryPolicy {
                echo_timeout_retries: self.protocol.echo_timeout_retries,
            },
            controller_type: self.hub.controller_type,
        }
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Timeout applied when the port is opened, in milliseconds
    pub read_timeout_ms: u64,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let port = PortConfiguration::default();
        Self {
            baud_rate: port.baud_rate,
            data_bits: port.data_bits,
            parity: port.parity,
            stop_bits: port.stop_bits,
            flow_control: port.flow_control,
            read_timeout_ms: 100,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Settings for opening a port.
    pub fn port_configuration(&self) -> PortConfiguration {
        PortConfiguration {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            flow_control: self.flow_control,
            parity: self.parity,
            stop_bits: self.stop_bits,
            timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

/// Command exchange timing section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Per-phase answer timeout in milliseconds
    pub answer_timeout_ms: u64,
    /// Longest single wait on the port while reading, in milliseconds
    pub poll_interval_ms: u64,
    /// How often a command whose echo never arrived is re-issued
    pub echo_timeout_retries: u32,
    /// Settle time before purging the echo of an unacknowledged command
    pub unacknowledged_settle_ms: u64,
    /// Go-online attempts before giving up on a controller
    pub go_online_attempts: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            answer_timeout_ms: 500,
            poll_interval_ms: 5,
            echo_timeout_retries: 1,
            unacknowledged_settle_ms: 5,
            go_online_attempts: 4,
        }
    }
}

impl ProtocolConfig {
    pub fn answer_timeout(&self) -> Duration {
        Duration::from_millis(self.answer_timeout_ms)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle_time: Duration::from_millis(self.unacknowledged_settle_ms),
        }
    }
}

/// Controller connection section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Serial port of the controller (name or alias)
    pub port: Option<String>,
    /// Assume this controller type instead of querying it
    pub controller_type: Option<ControllerType>,
}

/// Filter wheel section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelsConfig {
    pub a: WheelConfig,
    pub b: WheelConfig,
    pub c: WheelConfig,
}

impl WheelsConfig {
    /// Wheels with their config names.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &WheelConfig)> {
        [("a", &self.a), ("b", &self.b), ("c", &self.c)].into_iter()
    }
}

/// Settings of one filter wheel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelConfig {
    /// Speed 0-7
    pub speed: u8,
    /// Position taken while the shutter gate is closed
    pub closed_position: u8,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            speed: 3,
            closed_position: 0,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(ConfigError::validation(
                "logging.format",
                format!("\"{other}\" is not one of json, pretty, compact"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.protocol.answer_timeout_ms, 500);
        assert_eq!(config.protocol.go_online_attempts, 4);
        assert_eq!(config.wheels.b.speed, 3);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_alias_resolution() {
        let mut config = SerialConfig::default();
        config
            .port_aliases
            .insert("lambda".to_string(), "COM3".to_string());

        assert_eq!(config.resolve_port("lambda"), "COM3");
        assert_eq!(config.resolve_port("COM5"), "COM5");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("[protocol]"));
        assert!(toml_str.contains("[wheels.a]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [protocol]
            answer_timeout_ms = 2000

            [hub]
            port = "COM3"
            controller_type = "SC"

            [wheels.c]
            closed_position = 4
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.protocol.answer_timeout(), Duration::from_secs(2));
        assert_eq!(config.hub.port.as_deref(), Some("COM3"));
        assert_eq!(config.hub.controller_type, Some(ControllerType::SmartShutter));
        assert_eq!(config.wheels.c.closed_position, 4);
        // Defaults should still work
        assert_eq!(config.wheels.c.speed, 3);
        assert_eq!(config.protocol.poll_interval_ms, 5);

        let options = config.hub_options();
        assert_eq!(options.go_online_attempts, 4);
        assert_eq!(options.retry.echo_timeout_retries, 1);
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.wheels.a.speed = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref key, .. }) if key == "wheels.a.speed"
        ));

        let mut config = Config::default();
        config.wheels.c.closed_position = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.protocol.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.protocol.answer_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serial_port_configuration() {
        let config = SerialConfig {
            baud_rate: 19200,
            ..SerialConfig::default()
        };
        let port = config.port_configuration();
        assert_eq!(port.baud_rate, 19200);
        assert_eq!(port.timeout, Duration::from_millis(100));
    }
}
