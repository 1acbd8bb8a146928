//! The Lambda controller hub: one per physical port.
//!
//! The hub brings the controller online, identifies it and is the single
//! path through which wheels, shutters and the VF-5 reach the command engine.

use super::{keywords, read_only, unknown, PropertyValue, RetryPolicy, SubDevice};
use crate::error::{ConnectError, DeviceError, DeviceResult};
use crate::port::PortId;
use crate::protocol::{Command, CommandEngine, Completed, Exchange, ProtocolError};
use crate::registry::DEFAULT_ANSWER_TIMEOUT;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const GO_ONLINE: u8 = 0xEE;
const CONTROLLER_TYPE: u8 = 0xFD;
const STATUS: u8 = 0xCC;

/// Longest status block a controller sends, terminator excluded.
pub const STATUS_MAX_LEN: usize = 21;

/// Controller model as reported by the controller-type query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerType {
    #[serde(rename = "10-2")]
    Lambda10_2,
    #[serde(rename = "10-3")]
    Lambda10_3,
    #[serde(rename = "SC", alias = "sc")]
    SmartShutter,
    #[serde(rename = "other")]
    Other,
}

impl ControllerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lambda10_2 => "10-2",
            Self::Lambda10_3 => "10-3",
            Self::SmartShutter => "SC",
            Self::Other => "other",
        }
    }

    /// Whether Fast/Soft/ND shutter modes exist on this controller.
    pub fn supports_shutter_modes(&self) -> bool {
        matches!(self, Self::Lambda10_3 | Self::SmartShutter)
    }

    /// Whether shutter mode commands carry the shutter number.
    pub fn addresses_shutters(&self) -> bool {
        !matches!(self, Self::SmartShutter)
    }
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerType {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "10-2" => Ok(Self::Lambda10_2),
            "10-3" => Ok(Self::Lambda10_3),
            "SC" => Ok(Self::SmartShutter),
            "OTHER" => Ok(Self::Other),
            _ => Err(DeviceError::invalid_value(
                "controller_type",
                format!("\"{s}\" is not one of 10-2, 10-3, SC, other"),
            )),
        }
    }
}

/// What the controller said about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerInfo {
    pub controller_type: ControllerType,
    pub id: String,
}

impl ControllerInfo {
    /// The assumption made when a controller does not answer the type query.
    pub fn legacy() -> Self {
        Self::assumed(ControllerType::Lambda10_2)
    }

    /// Info for a controller type configured rather than queried.
    pub fn assumed(controller_type: ControllerType) -> Self {
        Self {
            controller_type,
            id: controller_type.as_str().to_string(),
        }
    }

    /// Decode the payload of the controller-type query.
    ///
    /// The reported id drops the last two characters of the reply.
    pub fn from_response(response: &[u8]) -> Self {
        if response.is_empty() {
            return Self::legacy();
        }

        let controller_type = if response.starts_with(b"SC") {
            ControllerType::SmartShutter
        } else if response.starts_with(b"10-3") {
            ControllerType::Lambda10_3
        } else {
            ControllerType::Other
        };

        let id_bytes = if response.len() > 2 {
            &response[..response.len() - 2]
        } else {
            response
        };

        Self {
            controller_type,
            id: String::from_utf8_lossy(id_bytes).into_owned(),
        }
    }
}

/// Hub behaviour knobs, usually filled from the `[protocol]` and `[hub]` config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubOptions {
    pub answer_timeout: Duration,
    pub go_online_attempts: u32,
    pub retry: RetryPolicy,
    /// Skip the controller-type query and assume this model.
    pub controller_type: Option<ControllerType>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
            go_online_attempts: 4,
            retry: RetryPolicy::default(),
            controller_type: None,
        }
    }
}

/// One Lambda controller on one serial port.
#[derive(Debug)]
pub struct LambdaHub {
    port: PortId,
    engine: CommandEngine,
    options: HubOptions,
    controller: OnceCell<ControllerInfo>,
}

impl LambdaHub {
    /// Create a hub on `port` with default options.
    pub fn new(port: impl Into<PortId>, engine: CommandEngine) -> Self {
        Self::with_options(port, engine, HubOptions::default())
    }

    /// Create a hub on `port`. The answer timeout becomes the port default.
    pub fn with_options(port: impl Into<PortId>, engine: CommandEngine, options: HubOptions) -> Self {
        let port = port.into();
        engine
            .registry()
            .set_default_timeout(&port, options.answer_timeout);

        let controller = OnceCell::new();
        if let Some(controller_type) = options.controller_type {
            let _ = controller.set(ControllerInfo::assumed(controller_type));
        }

        Self {
            port,
            engine,
            options,
            controller,
        }
    }

    pub fn port(&self) -> &PortId {
        &self.port
    }

    pub fn engine(&self) -> &CommandEngine {
        &self.engine
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    /// Bring the controller online and identify it.
    pub fn initialize(&self) -> DeviceResult<ControllerInfo> {
        self.go_online()?;
        let info = self.controller_info();
        info!(
            port = %self.port,
            controller = %info.controller_type,
            id = %info.id,
            "controller initialized"
        );
        Ok(info)
    }

    /// Switch the controller to serial (on-line) mode.
    ///
    /// The controller echoes the command without a terminator. Missing echoes
    /// are retried up to `go_online_attempts` times; transport failures are not.
    pub fn go_online(&self) -> DeviceResult<()> {
        let exchange = Exchange::new([GO_ONLINE]).no_terminator();
        let attempts = self.options.go_online_attempts.max(1);

        for attempt in 1..=attempts {
            match self.engine.send(&self.port, &exchange) {
                Ok(_) => {
                    debug!(port = %self.port, attempt, "controller online");
                    return Ok(());
                }
                Err(e @ ProtocolError::Transport(_)) => return Err(e.into()),
                Err(e) => debug!(port = %self.port, attempt, "go-online not acknowledged: {e}"),
            }
        }

        Err(ConnectError::NoAnswer {
            port: self.port.clone(),
            attempts,
        }
        .into())
    }

    /// The controller model, queried once and cached.
    pub fn controller_info(&self) -> ControllerInfo {
        self.controller.get_or_init(|| self.identify()).clone()
    }

    pub fn controller_type(&self) -> ControllerType {
        self.controller_info().controller_type
    }

    /// Query the controller type, falling back to a 10-2 when the controller
    /// gives no usable answer.
    pub fn identify(&self) -> ControllerInfo {
        match self.send(&Exchange::new([CONTROLLER_TYPE])) {
            Ok(done) if done.response.is_empty() => {
                warn!(port = %self.port, "empty controller-type reply, assuming a 10-2");
                ControllerInfo::legacy()
            }
            Ok(done) => ControllerInfo::from_response(&done.response),
            Err(e) => {
                warn!(port = %self.port, "controller-type query failed, assuming a 10-2: {e}");
                ControllerInfo::legacy()
            }
        }
    }

    /// Read the raw status block. Its layout depends on the controller type.
    pub fn status(&self) -> DeviceResult<Vec<u8>> {
        let done = self.send(&Exchange::new([STATUS]))?;
        if done.response.len() > STATUS_MAX_LEN {
            return Err(DeviceError::MalformedResponse {
                what: "status",
                len: done.response.len(),
            });
        }
        Ok(done.response)
    }

    /// Run an exchange under the hub's retry policy.
    pub fn send(&self, exchange: &Exchange) -> DeviceResult<Completed> {
        self.options
            .retry
            .run(|| self.engine.send(&self.port, exchange))
            .map_err(DeviceError::from)
    }

    /// Send a command whose acknowledgement is not needed.
    pub fn send_unacknowledged(&self, command: impl Into<Command>) -> DeviceResult<()> {
        Ok(self
            .engine
            .send_unacknowledged(&self.port, &command.into())?)
    }

    /// Per-phase timeout used by every exchange on this port.
    pub fn answer_timeout(&self) -> Duration {
        self.engine.registry().get_or_create(&self.port).default_timeout()
    }

    pub fn set_answer_timeout(&self, timeout: Duration) {
        self.engine.registry().set_default_timeout(&self.port, timeout);
    }

    /// Whether a command is in flight on the hub's port.
    pub fn busy(&self) -> bool {
        self.engine.is_busy(&self.port)
    }
}

impl SubDevice for LambdaHub {
    fn name(&self) -> &str {
        "Lambda-Hub"
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec![keywords::CONTROLLER_INFO, keywords::ANSWER_TIMEOUT, keywords::BUSY]
    }

    fn get_property(&self, name: &str) -> DeviceResult<PropertyValue> {
        match name {
            keywords::CONTROLLER_INFO => Ok(self.controller_info().id.into()),
            keywords::ANSWER_TIMEOUT => Ok(PropertyValue::Float(
                self.answer_timeout().as_secs_f64() * 1000.0,
            )),
            keywords::BUSY => Ok(self.busy().into()),
            _ => Err(unknown(name)),
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> DeviceResult<()> {
        match name {
            keywords::ANSWER_TIMEOUT => {
                self.set_answer_timeout(value.as_millis(name, false)?);
                Ok(())
            }
            keywords::CONTROLLER_INFO | keywords::BUSY => Err(read_only(name)),
            _ => Err(unknown(name)),
        }
    }

    fn busy(&self) -> bool {
        LambdaHub::busy(self)
    }
}
