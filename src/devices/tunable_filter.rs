//! Lambda VF-5 tunable filter.

use super::{keywords, read_only, unknown, LambdaHub, PropertyValue, SubDevice};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::Exchange;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

pub const MIN_WAVELENGTH_NM: u16 = 338;
pub const MAX_WAVELENGTH_NM: u16 = 900;
/// Speed shares the high wavelength byte, so only two bits are available.
pub const MAX_SPEED: u8 = 3;
/// Highest tilt the single-byte tilt command can carry.
pub const MAX_TILT: u8 = u8::MAX;
pub const MAX_TTL_CHANNEL: u8 = 2;

const SET_WAVELENGTH: u8 = 0xDA;
const GET_WAVELENGTH: u8 = 0xDB;
const WAVELENGTH_SELECTOR: u8 = 0x01;
const WHITE_LIGHT_ON: u8 = 0xAA;
const WHITE_LIGHT_OFF: u8 = 0xAC;
const SET_TILT: u8 = 0xDE;
const CONFIGURE_TTL: u8 = 0xFA;

/// A TTL line configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TtlConfig {
    pub channel: u8,
    pub rising_edge: bool,
    pub enabled: bool,
    pub output: bool,
}

impl TtlConfig {
    fn action(&self) -> u8 {
        let mut action = 0xA0 | (u8::from(self.output) << 4);
        if self.enabled {
            action |= if self.rising_edge { 0x03 } else { 0x04 };
        }
        action
    }
}

/// Build the set-wavelength exchange.
pub fn wavelength_exchange(nm: u16, speed: u8) -> Exchange {
    let high = ((nm >> 8) as u8 & 0x3F) | ((speed & MAX_SPEED) << 6);
    let low = (nm & 0xFF) as u8;
    Exchange::new([SET_WAVELENGTH, WAVELENGTH_SELECTOR, high, low])
}

/// Decode the payload of the wavelength query.
pub fn decode_wavelength(response: &[u8]) -> DeviceResult<u16> {
    match response {
        [WAVELENGTH_SELECTOR, high, low] => Ok((u16::from(high & 0x3F) << 8) | u16::from(*low)),
        _ => Err(DeviceError::MalformedResponse {
            what: "wavelength",
            len: response.len(),
        }),
    }
}

#[derive(Debug)]
struct Vf5State {
    wavelength: u16,
    speed: u8,
    white_light: bool,
    tilt: u8,
}

/// The VF-5 as seen through a Lambda hub.
#[derive(Debug)]
pub struct LambdaVf5 {
    hub: Arc<LambdaHub>,
    state: Mutex<Vf5State>,
}

impl LambdaVf5 {
    pub fn new(hub: Arc<LambdaHub>) -> Self {
        Self {
            hub,
            state: Mutex::new(Vf5State {
                wavelength: 500,
                speed: MAX_SPEED,
                white_light: false,
                tilt: 100,
            }),
        }
    }

    /// Last wavelength set or read, without asking the controller.
    pub fn cached_wavelength(&self) -> u16 {
        self.state.lock().wavelength
    }

    /// Query the controller for the current wavelength.
    pub fn wavelength(&self) -> DeviceResult<u16> {
        let done = self.hub.send(&Exchange::new([GET_WAVELENGTH]))?;
        let nm = decode_wavelength(&done.response)?;
        self.state.lock().wavelength = nm;
        Ok(nm)
    }

    pub fn set_wavelength(&self, nm: i64) -> DeviceResult<()> {
        let nm = u16::try_from(nm)
            .ok()
            .filter(|v| (MIN_WAVELENGTH_NM..=MAX_WAVELENGTH_NM).contains(v))
            .ok_or_else(|| {
                DeviceError::invalid_value(
                    keywords::WAVELENGTH,
                    format!("{nm} nm is outside {MIN_WAVELENGTH_NM}..={MAX_WAVELENGTH_NM}"),
                )
            })?;
        let mut state = self.state.lock();
        self.hub.send(&wavelength_exchange(nm, state.speed))?;
        debug!(nm, speed = state.speed, "wavelength set");
        state.wavelength = nm;
        Ok(())
    }

    pub fn speed(&self) -> u8 {
        self.state.lock().speed
    }

    pub fn set_speed(&self, speed: i64) -> DeviceResult<()> {
        let speed = u8::try_from(speed)
            .ok()
            .filter(|v| *v <= MAX_SPEED)
            .ok_or(DeviceError::InvalidSpeed { speed, max: MAX_SPEED })?;
        self.state.lock().speed = speed;
        Ok(())
    }

    pub fn white_light_mode(&self) -> bool {
        self.state.lock().white_light
    }

    pub fn set_white_light_mode(&self, enabled: bool) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let command = if enabled { WHITE_LIGHT_ON } else { WHITE_LIGHT_OFF };
        self.hub.send(&Exchange::new([command]))?;
        state.white_light = enabled;
        Ok(())
    }

    pub fn tilt(&self) -> u8 {
        self.state.lock().tilt
    }

    /// Tilt the filter by `steps` micro-steps.
    pub fn set_tilt(&self, steps: i64) -> DeviceResult<()> {
        let steps = u8::try_from(steps).map_err(|_| {
            DeviceError::invalid_value(keywords::WHEEL_TILT, format!("{steps} is outside 0..={MAX_TILT}"))
        })?;
        let mut state = self.state.lock();
        self.hub.send(&Exchange::new([SET_TILT, steps]))?;
        state.tilt = steps;
        Ok(())
    }

    pub fn configure_ttl(&self, ttl: TtlConfig) -> DeviceResult<()> {
        if ttl.channel > MAX_TTL_CHANNEL {
            return Err(DeviceError::invalid_value(
                "ttl channel",
                format!("{} is outside 0..={MAX_TTL_CHANNEL}", ttl.channel),
            ));
        }
        self.hub
            .send(&Exchange::new([CONFIGURE_TTL, ttl.action(), ttl.channel]))?;
        debug!(?ttl, "ttl configured");
        Ok(())
    }
}

impl SubDevice for LambdaVf5 {
    fn name(&self) -> &str {
        "Lambda-VF5"
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec![
            keywords::WAVELENGTH,
            keywords::SPEED,
            keywords::WHITE_LIGHT_MODE,
            keywords::WHEEL_TILT,
            keywords::BUSY,
        ]
    }

    fn get_property(&self, name: &str) -> DeviceResult<PropertyValue> {
        match name {
            keywords::WAVELENGTH => Ok(i64::from(self.wavelength()?).into()),
            keywords::SPEED => Ok(i64::from(self.speed()).into()),
            keywords::WHITE_LIGHT_MODE => Ok(self.white_light_mode().into()),
            keywords::WHEEL_TILT => Ok(i64::from(self.tilt()).into()),
            keywords::BUSY => Ok(self.busy().into()),
            _ => Err(unknown(name)),
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> DeviceResult<()> {
        match name {
            keywords::WAVELENGTH => self.set_wavelength(value.as_integer(name)?),
            keywords::SPEED => self.set_speed(value.as_integer(name)?),
            keywords::WHITE_LIGHT_MODE => self.set_white_light_mode(value.as_bool(name)?),
            keywords::WHEEL_TILT => self.set_tilt(value.as_integer(name)?),
            keywords::BUSY => Err(read_only(name)),
            _ => Err(unknown(name)),
        }
    }

    fn busy(&self) -> bool {
        self.hub.busy()
    }
}
