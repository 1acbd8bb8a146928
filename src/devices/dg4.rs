//! DG-4 filter changer and its shutter.
//!
//! The DG-4 takes a single byte per move: `0..=12` selects a filter and `0`
//! doubles as "shutter closed". Opening the shutter re-sends the selected
//! filter. The wheel and shutter therefore share one [`Dg4Gate`]; while the
//! shutter is closed a wheel move is only recorded and takes effect on the
//! next open.

use super::{keywords, read_only, unknown, LambdaHub, PropertyValue, SubDevice};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::Exchange;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of DG-4 filter positions.
pub const DG4_POSITIONS: u8 = 13;

const GO_ONLINE: u8 = 0xEE;
const CLOSE: u8 = 0;

#[derive(Debug, Default)]
struct GateState {
    position: u8,
    open: bool,
}

/// Position and shutter state shared by the DG-4 wheel and shutter on one port.
#[derive(Debug, Clone, Default)]
pub struct Dg4Gate(Arc<Mutex<GateState>>);

impl Dg4Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last filter selected on the wheel.
    pub fn position(&self) -> u8 {
        self.0.lock().position
    }

    /// Whether the shutter last acknowledged an open.
    pub fn is_open(&self) -> bool {
        self.0.lock().open
    }
}

#[derive(Debug, Default)]
struct Timing {
    delay: Duration,
    changed_at: Option<Instant>,
}

impl Timing {
    fn settling(&self) -> bool {
        self.changed_at.is_some_and(|at| at.elapsed() < self.delay)
    }

    fn delay_ms(&self) -> PropertyValue {
        PropertyValue::Float(self.delay.as_secs_f64() * 1000.0)
    }
}

/// The DG-4 filter selector.
#[derive(Debug)]
pub struct Dg4Wheel {
    hub: Arc<LambdaHub>,
    gate: Dg4Gate,
    timing: Mutex<Timing>,
}

impl Dg4Wheel {
    pub fn new(hub: Arc<LambdaHub>, gate: Dg4Gate) -> Self {
        Self {
            hub,
            gate,
            timing: Mutex::default(),
        }
    }

    /// Put the DG-4 in serial mode. It does not acknowledge this byte.
    pub fn initialize(&self) -> DeviceResult<()> {
        self.hub.send_unacknowledged([GO_ONLINE])
    }

    pub fn position(&self) -> u8 {
        self.gate.position()
    }

    /// Select filter `position`. Sent only while the shutter is open.
    pub fn set_position(&self, position: i64) -> DeviceResult<()> {
        let max = DG4_POSITIONS - 1;
        let target = u8::try_from(position)
            .ok()
            .filter(|p| *p <= max)
            .ok_or(DeviceError::PositionOutOfRange { position, max })?;

        let mut gate = self.gate.0.lock();
        if gate.position == target {
            return Ok(());
        }
        if !gate.open {
            debug!(position = target, "DG-4 shutter closed, recording position only");
            gate.position = target;
            return Ok(());
        }

        self.hub.send(&Exchange::new([target]))?;
        gate.position = target;
        self.timing.lock().changed_at = Some(Instant::now());
        Ok(())
    }

    pub fn set_delay(&self, delay: Duration) {
        self.timing.lock().delay = delay;
    }
}

impl SubDevice for Dg4Wheel {
    fn name(&self) -> &str {
        "Wheel-DG4"
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec![keywords::STATE, keywords::DELAY, keywords::BUSY]
    }

    fn get_property(&self, name: &str) -> DeviceResult<PropertyValue> {
        match name {
            keywords::STATE => Ok(i64::from(self.position()).into()),
            keywords::DELAY => Ok(self.timing.lock().delay_ms()),
            keywords::BUSY => Ok(self.busy().into()),
            _ => Err(unknown(name)),
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> DeviceResult<()> {
        match name {
            keywords::STATE => self.set_position(value.as_integer(name)?),
            keywords::DELAY => {
                self.set_delay(value.as_millis(name, true)?);
                Ok(())
            }
            keywords::BUSY => Err(read_only(name)),
            _ => Err(unknown(name)),
        }
    }

    fn busy(&self) -> bool {
        self.hub.busy() || self.timing.lock().settling()
    }
}

/// The DG-4 shutter. Opening re-selects the wheel's filter, closing sends `0`.
#[derive(Debug)]
pub struct Dg4Shutter {
    hub: Arc<LambdaHub>,
    gate: Dg4Gate,
    timing: Mutex<Timing>,
}

impl Dg4Shutter {
    pub fn new(hub: Arc<LambdaHub>, gate: Dg4Gate) -> Self {
        Self {
            hub,
            gate,
            timing: Mutex::default(),
        }
    }

    /// Close the shutter so the gate starts in a known state.
    pub fn initialize(&self) -> DeviceResult<()> {
        self.set_open(false)
    }

    pub fn is_open(&self) -> bool {
        self.gate.is_open()
    }

    pub fn set_open(&self, open: bool) -> DeviceResult<()> {
        let mut gate = self.gate.0.lock();
        let command = if open { gate.position } else { CLOSE };
        debug!(open, command, "switching DG-4 shutter");

        self.hub.send(&Exchange::new([command]))?;
        gate.open = open;
        self.timing.lock().changed_at = Some(Instant::now());
        Ok(())
    }

    pub fn set_delay(&self, delay: Duration) {
        self.timing.lock().delay = delay;
    }
}

impl SubDevice for Dg4Shutter {
    fn name(&self) -> &str {
        "Shutter-DG4"
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec![keywords::STATE, keywords::DELAY, keywords::BUSY]
    }

    fn get_property(&self, name: &str) -> DeviceResult<PropertyValue> {
        match name {
            keywords::STATE => Ok(self.is_open().into()),
            keywords::DELAY => Ok(self.timing.lock().delay_ms()),
            keywords::BUSY => Ok(self.busy().into()),
            _ => Err(unknown(name)),
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> DeviceResult<()> {
        match name {
            keywords::STATE => self.set_open(value.as_bool(name)?),
            keywords::DELAY => {
                self.set_delay(value.as_millis(name, true)?);
                Ok(())
            }
            keywords::BUSY => Err(read_only(name)),
            _ => Err(unknown(name)),
        }
    }

    fn busy(&self) -> bool {
        self.hub.busy() || self.timing.lock().settling()
    }
}
