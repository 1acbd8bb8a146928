//! Shutters A and B.
//!
//! The SC intermittently echoes "close" for "open" and vice versa, so every
//! open/close command carries the opposite byte as alternate echo.

use super::{keywords, read_only, unknown, ControllerType, LambdaHub, PropertyValue, SubDevice};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::{Exchange, ProtocolError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Neutral-density range accepted by the controllers.
pub const ND_MIN: u8 = 1;
pub const ND_MAX: u8 = 144;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutterId {
    A,
    B,
}

impl ShutterId {
    pub fn label(self) -> &'static str {
        match self {
            Self::A => "Shutter-A",
            Self::B => "Shutter-B",
        }
    }

    fn open_byte(self) -> u8 {
        match self {
            Self::A => 170,
            Self::B => 186,
        }
    }

    fn close_byte(self) -> u8 {
        match self {
            Self::A => 172,
            Self::B => 188,
        }
    }

    /// Shutter number used in mode commands.
    fn number(self) -> u8 {
        match self {
            Self::A => 1,
            Self::B => 2,
        }
    }
}

impl fmt::Display for ShutterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShutterMode {
    Fast,
    Soft,
    #[serde(rename = "ND")]
    Nd,
}

impl ShutterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "Fast",
            Self::Soft => "Soft",
            Self::Nd => "ND",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Fast => 0xDC,
            Self::Soft => 0xDD,
            Self::Nd => 0xDE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0xDC => Some(Self::Fast),
            0xDD => Some(Self::Soft),
            0xDE => Some(Self::Nd),
            _ => None,
        }
    }
}

impl fmt::Display for ShutterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShutterMode {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "soft" => Ok(Self::Soft),
            "nd" => Ok(Self::Nd),
            _ => Err(DeviceError::invalid_value(
                keywords::MODE,
                format!("\"{s}\" is not one of Fast, Soft, ND"),
            )),
        }
    }
}

/// Shutter fields found in a controller status block. Missing or
/// unrecognised bytes leave a field `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutterStatus {
    pub open: Option<bool>,
    pub mode: Option<ShutterMode>,
    pub nd: Option<u8>,
}

/// Decode the status block of `controller` for shutter `id`.
pub fn decode_status(controller: ControllerType, id: ShutterId, status: &[u8]) -> ShutterStatus {
    let (open_at, mode_at, nd_at) = match (controller, id) {
        (ControllerType::Lambda10_3, ShutterId::A) => (4, 6, 7),
        (ControllerType::Lambda10_3, ShutterId::B) => {
            // A trailing ND byte for shutter A shifts shutter B's mode fields.
            let offset = usize::from(status.get(6) == Some(&ShutterMode::Nd.code()));
            (5, 7 + offset, 8 + offset)
        }
        (ControllerType::SmartShutter, _) => (0, 1, 2),
        _ => return ShutterStatus::default(),
    };

    let open = status.get(open_at).and_then(|&b| {
        if b == id.open_byte() {
            Some(true)
        } else if b == id.close_byte() {
            Some(false)
        } else {
            None
        }
    });
    let mode = status.get(mode_at).copied().and_then(ShutterMode::from_code);
    let nd = match mode {
        Some(ShutterMode::Nd) => status.get(nd_at).copied(),
        _ => None,
    };

    ShutterStatus { open, mode, nd }
}

#[derive(Debug)]
struct ShutterState {
    open: bool,
    mode: ShutterMode,
    nd: u8,
    delay: Duration,
    changed_at: Option<Instant>,
}

/// One shutter behind a Lambda hub.
#[derive(Debug)]
pub struct Shutter {
    hub: Arc<LambdaHub>,
    id: ShutterId,
    state: Mutex<ShutterState>,
}

impl Shutter {
    pub fn new(hub: Arc<LambdaHub>, id: ShutterId) -> Self {
        Self {
            hub,
            id,
            state: Mutex::new(ShutterState {
                open: false,
                mode: ShutterMode::Fast,
                nd: ND_MIN,
                delay: Duration::ZERO,
                changed_at: None,
            }),
        }
    }

    pub fn id(&self) -> ShutterId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn mode(&self) -> ShutterMode {
        self.state.lock().mode
    }

    pub fn nd(&self) -> u8 {
        self.state.lock().nd
    }

    /// Exchange that opens or closes this shutter.
    pub fn open_exchange(&self, open: bool) -> Exchange {
        let (command, inverted) = if open {
            (self.id.open_byte(), self.id.close_byte())
        } else {
            (self.id.close_byte(), self.id.open_byte())
        };
        Exchange::new([command]).alternate_echo([inverted])
    }

    pub fn set_open(&self, open: bool) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let done = self.hub.send(&self.open_exchange(open))?;
        if done.alternate_echo {
            debug!(shutter = %self.id, open, "shutter acknowledged with inverted echo");
        }
        state.open = open;
        state.changed_at = Some(Instant::now());
        Ok(())
    }

    /// Select Fast, Soft or ND operation. ND mode uses the cached ND setting.
    pub fn set_mode(&self, mode: ShutterMode) -> DeviceResult<()> {
        let controller = self.require_modes("shutter modes")?;
        let mut state = self.state.lock();
        let exchange = match mode {
            ShutterMode::Nd => self.nd_exchange(controller, state.nd),
            _ => {
                let mut command = vec![mode.code()];
                if controller.addresses_shutters() {
                    command.push(self.id.number());
                }
                Exchange::new(command)
            }
        };
        self.hub.send(&exchange)?;
        state.mode = mode;
        Ok(())
    }

    /// Change the ND setting. It is sent immediately only in ND mode.
    pub fn set_nd(&self, nd: i64) -> DeviceResult<()> {
        let nd = u8::try_from(nd)
            .ok()
            .filter(|v| (ND_MIN..=ND_MAX).contains(v))
            .ok_or_else(|| {
                DeviceError::invalid_value(keywords::ND_SETTING, format!("{nd} is outside {ND_MIN}..={ND_MAX}"))
            })?;
        let controller = self.require_modes("ND setting")?;
        let mut state = self.state.lock();
        if state.mode == ShutterMode::Nd {
            self.hub.send(&self.nd_exchange(controller, nd))?;
        }
        state.nd = nd;
        Ok(())
    }

    /// Time the shutter is reported busy after opening or closing.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Refresh cached state from the controller's status block.
    ///
    /// Controllers that do not understand the status query are tolerated;
    /// only transport failures are reported.
    pub fn sync_from_status(&self) -> DeviceResult<ShutterStatus> {
        let controller = self.hub.controller_type();
        let block = match self.hub.status() {
            Ok(block) => block,
            Err(e @ DeviceError::Protocol(ProtocolError::Transport(_))) => return Err(e),
            Err(e) => {
                debug!(shutter = %self.id, "status query not answered: {e}");
                return Ok(ShutterStatus::default());
            }
        };

        let status = decode_status(controller, self.id, &block);
        let mut state = self.state.lock();
        if let Some(open) = status.open {
            state.open = open;
        }
        if let Some(mode) = status.mode {
            state.mode = mode;
        }
        if let Some(nd) = status.nd {
            state.nd = nd;
        }
        state.changed_at = Some(Instant::now());
        info!(shutter = %self.id, open = state.open, mode = %state.mode, nd = state.nd, "shutter state synchronized");
        Ok(status)
    }

    fn nd_exchange(&self, controller: ControllerType, nd: u8) -> Exchange {
        if controller.addresses_shutters() {
            Exchange::new([ShutterMode::Nd.code(), self.id.number(), nd])
        } else {
            Exchange::new([ShutterMode::Nd.code(), nd])
        }
    }

    fn require_modes(&self, feature: &'static str) -> DeviceResult<ControllerType> {
        let controller = self.hub.controller_type();
        if controller.supports_shutter_modes() {
            Ok(controller)
        } else {
            Err(DeviceError::UnsupportedByController {
                feature,
                controller: controller.to_string(),
            })
        }
    }
}

impl SubDevice for Shutter {
    fn name(&self) -> &str {
        self.id.label()
    }

    fn property_names(&self) -> Vec<&'static str> {
        let mut names = vec![keywords::STATE, keywords::DELAY, keywords::BUSY];
        if self.hub.controller_type().supports_shutter_modes() {
            names.extend([keywords::MODE, keywords::ND_SETTING]);
        }
        names
    }

    fn get_property(&self, name: &str) -> DeviceResult<PropertyValue> {
        match name {
            keywords::STATE => Ok(self.is_open().into()),
            keywords::MODE => Ok(self.mode().as_str().into()),
            keywords::ND_SETTING => Ok(i64::from(self.nd()).into()),
            keywords::DELAY => Ok(PropertyValue::Float(
                self.state.lock().delay.as_secs_f64() * 1000.0,
            )),
            keywords::BUSY => Ok(self.busy().into()),
            _ => Err(unknown(name)),
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> DeviceResult<()> {
        match name {
            keywords::STATE => self.set_open(value.as_bool(name)?),
            keywords::MODE => self.set_mode(value.as_text().parse()?),
            keywords::ND_SETTING => self.set_nd(value.as_integer(name)?),
            keywords::DELAY => {
                self.set_delay(value.as_millis(name, true)?);
                Ok(())
            }
            keywords::BUSY => Err(read_only(name)),
            _ => Err(unknown(name)),
        }
    }

    fn busy(&self) -> bool {
        if self.hub.busy() {
            return true;
        }
        let state = self.state.lock();
        state
            .changed_at
            .is_some_and(|at| at.elapsed() < state.delay)
    }
}
