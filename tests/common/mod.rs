//! Shared test utilities for lambda_link integration tests.
//!
//! This module provides common test infrastructure including:
//! - Engines and hubs wired to a `MockTransport` with a private registry
//! - A simulated Lambda controller responder
//! - A transport that delivers bytes on a schedule, for timing tests
//! - Helpers for checking per-port call logs

#![allow(dead_code)]

use lambda_link::devices::{ControllerType, HubOptions, LambdaHub};
use lambda_link::port::{MockTransport, PortError, PortId, Transport, TransportCall};
use lambda_link::protocol::{CommandEngine, TERMINATOR};
use lambda_link::registry::PortRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Short per-phase timeout that keeps failing tests fast.
pub const FAST: Duration = Duration::from_millis(50);

/// Status block of a 10-3 with shutter A open in ND mode (ND 12) and shutter B closed in Soft mode.
pub const STATUS_10_3: [u8; 10] = [0x00, 0x00, 0x00, 0x00, 170, 188, 0xDE, 0x0C, 0xDD, 0x00];

pub fn port(name: &str) -> PortId {
    PortId::new(name)
}

/// An engine over a fresh mock and a private registry.
pub fn engine_with_mock() -> (MockTransport, CommandEngine) {
    let mock = MockTransport::new();
    let engine = CommandEngine::with_registry(Arc::new(mock.clone()), Arc::new(PortRegistry::new()));
    (mock, engine)
}

/// A hub on "MOCK0" with a short answer timeout.
pub fn hub_on_mock(controller_type: Option<ControllerType>) -> (MockTransport, Arc<LambdaHub>) {
    let (mock, engine) = engine_with_mock();
    let options = HubOptions {
        answer_timeout: FAST,
        controller_type,
        ..HubOptions::default()
    };
    let hub = Arc::new(LambdaHub::with_options("MOCK0", engine, options));
    (mock, hub)
}

/// Make `port` behave like a Lambda controller.
///
/// Every command is echoed and terminated, except go-online which is only
/// echoed. The type query answers `id`, the status query answers `status`,
/// and the VF-5 wavelength query answers 520 nm.
pub fn simulate_controller(mock: &MockTransport, port: &PortId, id: &'static [u8], status: Vec<u8>) {
    mock.set_responder(port, move |command| {
        let mut reply = command.to_vec();
        match command.first() {
            Some(0xEE) => return reply,
            Some(0xFD) => reply.extend_from_slice(id),
            Some(0xCC) => reply.extend_from_slice(&status),
            Some(0xDB) => reply.extend_from_slice(&[0x01, 0x02, 0x08]),
            _ => {}
        }
        reply.push(TERMINATOR);
        reply
    });
}

/// Split a port's call log into exchanges, each starting with a purge.
pub fn sessions(calls: &[TransportCall]) -> Vec<Vec<TransportCall>> {
    let mut sessions: Vec<Vec<TransportCall>> = Vec::new();
    for call in calls {
        match call {
            TransportCall::Purge(_) => sessions.push(vec![call.clone()]),
            _ => match sessions.last_mut() {
                Some(session) => session.push(call.clone()),
                None => sessions.push(vec![call.clone()]),
            },
        }
    }
    sessions
}

/// Bytes delivered to the reader within one session.
pub fn reads(session: &[TransportCall]) -> Vec<u8> {
    session
        .iter()
        .filter_map(|call| match call {
            TransportCall::Read(_, byte) => Some(*byte),
            _ => None,
        })
        .collect()
}

/// A transport that releases each reply byte at a fixed delay after the write.
#[derive(Debug, Default)]
pub struct ScheduledTransport {
    schedule: Mutex<Vec<(Duration, u8)>>,
    pending: Mutex<Vec<(Instant, u8)>>,
}

impl ScheduledTransport {
    /// Deliver `byte` at `delay` after the next write.
    pub fn at(self, delay: Duration, byte: u8) -> Self {
        self.schedule.lock().push((delay, byte));
        self
    }
}

impl Transport for ScheduledTransport {
    fn write(&self, _port: &PortId, _data: &[u8]) -> Result<(), PortError> {
        let now = Instant::now();
        let schedule = std::mem::take(&mut *self.schedule.lock());
        self.pending
            .lock()
            .extend(schedule.into_iter().map(|(delay, byte)| (now + delay, byte)));
        Ok(())
    }

    fn read_byte(&self, _port: &PortId, timeout: Duration) -> Result<Option<u8>, PortError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut pending = self.pending.lock();
                if let Some(&(at, byte)) = pending.first() {
                    if at <= Instant::now() {
                        pending.remove(0);
                        return Ok(Some(byte));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn purge(&self, _port: &PortId) -> Result<(), PortError> {
        let now = Instant::now();
        self.pending.lock().retain(|(at, _)| *at > now);
        Ok(())
    }
}
