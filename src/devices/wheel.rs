//! Filter wheels A, B and C.
//!
//! A position command is one byte, `speed * 16 + position`, with bit 7 set for
//! wheel B. Wheel C is addressed with a `252` prefix. The 10-2 sometimes
//! echoes only the position, so `[position]` is accepted as alternate echo.

use super::{keywords, read_only, unknown, LambdaHub, PropertyValue, SubDevice};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::Exchange;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of filter positions on every wheel.
pub const POSITIONS: u8 = 10;
/// Fastest wheel speed setting.
pub const MAX_SPEED: u8 = 7;
/// Speed used until configured otherwise.
pub const DEFAULT_SPEED: u8 = 3;

const WHEEL_B_FLAG: u8 = 128;
const WHEEL_C_PREFIX: u8 = 252;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WheelId {
    A,
    B,
    C,
}

impl WheelId {
    pub const ALL: [WheelId; 3] = [WheelId::A, WheelId::B, WheelId::C];

    pub fn label(self) -> &'static str {
        match self {
            Self::A => "Wheel-A",
            Self::B => "Wheel-B",
            Self::C => "Wheel-C",
        }
    }
}

impl fmt::Display for WheelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Build the exchange that moves `wheel` to `position` at `speed`.
pub fn position_exchange(wheel: WheelId, position: u8, speed: u8) -> Exchange {
    let code = ((speed & 0x07) << 4) | (position & 0x0F);
    let exchange = match wheel {
        WheelId::A => Exchange::new([code]),
        WheelId::B => Exchange::new([WHEEL_B_FLAG + code]),
        WheelId::C => Exchange::new([WHEEL_C_PREFIX, code]),
    };
    exchange.alternate_echo([position])
}

#[derive(Debug)]
struct WheelState {
    position: u8,
    speed: u8,
    closed_position: u8,
    gate_open: bool,
    /// Gate state under which the last move was applied; `None` before the first move.
    applied: Option<bool>,
    delay: Duration,
    changed_at: Option<Instant>,
}

/// One filter wheel behind a Lambda hub.
#[derive(Debug)]
pub struct FilterWheel {
    hub: Arc<LambdaHub>,
    id: WheelId,
    state: Mutex<WheelState>,
}

impl FilterWheel {
    pub fn new(hub: Arc<LambdaHub>, id: WheelId) -> Self {
        Self {
            hub,
            id,
            state: Mutex::new(WheelState {
                position: 0,
                speed: DEFAULT_SPEED,
                closed_position: 0,
                gate_open: true,
                applied: None,
                delay: Duration::ZERO,
                changed_at: None,
            }),
        }
    }

    pub fn id(&self) -> WheelId {
        self.id
    }

    /// The requested position. While the gate is closed this is the position
    /// the wheel returns to once it reopens.
    pub fn position(&self) -> u8 {
        self.state.lock().position
    }

    pub fn speed(&self) -> u8 {
        self.state.lock().speed
    }

    pub fn closed_position(&self) -> u8 {
        self.state.lock().closed_position
    }

    pub fn gate_open(&self) -> bool {
        self.state.lock().gate_open
    }

    /// Request `position`.
    ///
    /// With the gate open the wheel moves unless it already sits there. With
    /// the gate closed the position is remembered and the wheel is parked at
    /// the closed position, once.
    pub fn set_position(&self, position: i64) -> DeviceResult<()> {
        let position = check_range(position, POSITIONS - 1)
            .ok_or(DeviceError::PositionOutOfRange { position, max: POSITIONS - 1 })?;
        let mut state = self.state.lock();
        self.apply(&mut state, position)
    }

    /// Record the state of the shared shutter gate and re-apply the wheel.
    pub fn set_gate_open(&self, open: bool) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if state.gate_open == open {
            return Ok(());
        }
        state.gate_open = open;
        if state.applied.is_none() {
            return Ok(());
        }
        let position = state.position;
        self.apply(&mut state, position)
    }

    pub fn set_speed(&self, speed: i64) -> DeviceResult<()> {
        let speed = check_range(speed, MAX_SPEED).ok_or(DeviceError::InvalidSpeed { speed, max: MAX_SPEED })?;
        self.state.lock().speed = speed;
        Ok(())
    }

    pub fn set_closed_position(&self, position: i64) -> DeviceResult<()> {
        let position = check_range(position, POSITIONS - 1)
            .ok_or(DeviceError::PositionOutOfRange { position, max: POSITIONS - 1 })?;
        self.state.lock().closed_position = position;
        Ok(())
    }

    /// Time the wheel is reported busy after a move.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    fn apply(&self, state: &mut WheelState, position: u8) -> DeviceResult<()> {
        let target = if state.gate_open {
            if state.applied == Some(true) && state.position == position {
                return Ok(());
            }
            position
        } else {
            if state.applied == Some(false) {
                state.position = position;
                return Ok(());
            }
            state.closed_position
        };

        debug!(wheel = %self.id, position, target, gate_open = state.gate_open, "moving wheel");
        self.hub
            .send(&position_exchange(self.id, target, state.speed))?;

        state.position = position;
        state.applied = Some(state.gate_open);
        state.changed_at = Some(Instant::now());
        Ok(())
    }
}

fn check_range(value: i64, max: u8) -> Option<u8> {
    u8::try_from(value).ok().filter(|v| *v <= max)
}

impl SubDevice for FilterWheel {
    fn name(&self) -> &str {
        self.id.label()
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec![
            keywords::STATE,
            keywords::SPEED,
            keywords::CLOSED_POSITION,
            keywords::DELAY,
            keywords::BUSY,
        ]
    }

    fn get_property(&self, name: &str) -> DeviceResult<PropertyValue> {
        let state = self.state.lock();
        match name {
            keywords::STATE => Ok(i64::from(state.position).into()),
            keywords::SPEED => Ok(i64::from(state.speed).into()),
            keywords::CLOSED_POSITION => Ok(i64::from(state.closed_position).into()),
            keywords::DELAY => Ok(PropertyValue::Float(state.delay.as_secs_f64() * 1000.0)),
            keywords::BUSY => {
                drop(state);
                Ok(self.busy().into())
            }
            _ => Err(unknown(name)),
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> DeviceResult<()> {
        match name {
            keywords::STATE => self.set_position(value.as_integer(name)?),
            keywords::SPEED => self.set_speed(value.as_integer(name)?),
            keywords::CLOSED_POSITION => self.set_closed_position(value.as_integer(name)?),
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
