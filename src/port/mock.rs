//! Mock transport implementation for testing.
//!
//! Provides a `MockTransport` that simulates one or more controllers without
//! requiring hardware. Replies are queued per port and released when the
//! engine writes a command, so a purge before the write does not swallow them.

use super::error::PortError;
use super::traits::{PortId, Transport};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Computes the bytes a simulated controller sends back for a written command.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// One observed transport call, in global order across all ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// The receive buffer of the port was purged.
    Purge(PortId),
    /// A command was written.
    Write(PortId, Vec<u8>),
    /// A byte was delivered to the reader.
    Read(PortId, u8),
}

impl TransportCall {
    /// The port the call addressed.
    pub fn port(&self) -> &PortId {
        match self {
            Self::Purge(port) | Self::Write(port, _) | Self::Read(port, _) => port,
        }
    }
}

/// Which operation a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    Write,
    Read,
    Purge,
}

#[derive(Default)]
struct MockPortState {
    /// Bytes available to `read_byte` right now.
    rx: VecDeque<u8>,
    /// Scripted replies, one consumed per write.
    replies: VecDeque<Vec<u8>>,
    /// Fallback reply generator when no scripted reply is queued.
    responder: Option<Responder>,
    /// Faults to inject, consumed in order as matching operations occur.
    faults: VecDeque<MockFault>,
}

#[derive(Default)]
struct MockState {
    ports: HashMap<PortId, MockPortState>,
    log: Vec<TransportCall>,
}

impl MockState {
    fn port(&mut self, port: &PortId) -> &mut MockPortState {
        self.ports.entry(port.clone()).or_default()
    }

    fn take_fault(&mut self, port: &PortId, op: MockFault) -> bool {
        let faults = &mut self.port(port).faults;
        if faults.front() == Some(&op) {
            faults.pop_front();
            true
        } else {
            false
        }
    }
}

/// Mock transport implementation for testing.
///
/// This implementation allows you to:
/// - Script the reply a controller sends for each written command
/// - Install a responder that computes replies (e.g. a loopback echo)
/// - Leave stale bytes in the receive buffer to exercise purging
/// - Inject I/O faults on write, read or purge
/// - Inspect the globally ordered log of calls
///
/// Clones share state, so a test can keep a handle while the engine owns another.
///
/// # Example
/// ```
/// use lambda_link::port::{MockTransport, PortId, Transport};
/// use std::time::Duration;
///
/// let mock = MockTransport::new();
/// let port = PortId::new("MOCK0");
/// mock.script_reply(&port, &[0xAA, 0x0D]);
///
/// mock.write(&port, &[0xAA]).unwrap();
/// assert_eq!(mock.read_byte(&port, Duration::ZERO).unwrap(), Some(0xAA));
/// assert_eq!(mock.read_byte(&port, Duration::ZERO).unwrap(), Some(0x0D));
/// assert_eq!(mock.read_byte(&port, Duration::ZERO).unwrap(), None);
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a mock transport with no scripted behaviour.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the bytes the controller sends after the next write to `port`.
    ///
    /// Each write consumes one scripted reply, in order.
    pub fn script_reply(&self, port: &PortId, reply: &[u8]) {
        self.state.lock().port(port).replies.push_back(reply.to_vec());
    }

    /// Install a responder used for writes that have no scripted reply.
    pub fn set_responder<F>(&self, port: &PortId, responder: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.state.lock().port(port).responder = Some(Arc::new(responder));
    }

    /// Simulate a well-behaved controller: echo every command and, if
    /// `terminate` is set, follow it with a carriage return.
    pub fn echo_commands(&self, port: &PortId, terminate: bool) {
        self.set_responder(port, move |command| {
            let mut reply = command.to_vec();
            if terminate {
                reply.push(crate::protocol::TERMINATOR);
            }
            reply
        });
    }

    /// Make bytes available immediately, as if left over from an earlier exchange.
    pub fn enqueue_rx(&self, port: &PortId, data: &[u8]) {
        self.state.lock().port(port).rx.extend(data);
    }

    /// Make the next matching operation on `port` fail with an I/O error.
    pub fn inject_fault(&self, port: &PortId, fault: MockFault) {
        self.state.lock().port(port).faults.push_back(fault);
    }

    /// A copy of every call observed so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().log.clone()
    }

    /// Calls observed for one port only.
    pub fn calls_for(&self, port: &PortId) -> Vec<TransportCall> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|call| call.port() == port)
            .cloned()
            .collect()
    }

    /// The commands written to `port`, in order.
    pub fn writes(&self, port: &PortId) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write(p, data) if p == port => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear the call log.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Number of bytes waiting in the receive buffer of `port`.
    pub fn pending_rx(&self, port: &PortId) -> usize {
        self.state.lock().ports.get(port).map_or(0, |p| p.rx.len())
    }

    fn fault_error(op: MockFault) -> PortError {
        PortError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("injected {op:?} fault"),
        ))
    }

    fn try_pop(&self, port: &PortId) -> Option<u8> {
        let mut state = self.state.lock();
        let byte = state.port(port).rx.pop_front()?;
        state.log.push(TransportCall::Read(port.clone(), byte));
        Some(byte)
    }
}

impl Transport for MockTransport {
    fn write(&self, port: &PortId, data: &[u8]) -> Result<(), PortError> {
        let mut state = self.state.lock();
        if state.take_fault(port, MockFault::Write) {
            return Err(Self::fault_error(MockFault::Write));
        }
        state.log.push(TransportCall::Write(port.clone(), data.to_vec()));

        let entry = state.port(port);
        let reply = match entry.replies.pop_front() {
            Some(reply) => reply,
            None => entry
                .responder
                .as_ref()
                .map(|responder| responder(data))
                .unwrap_or_default(),
        };
        entry.rx.extend(reply);
        Ok(())
    }

    fn read_byte(&self, port: &PortId, timeout: Duration) -> Result<Option<u8>, PortError> {
        if self.state.lock().take_fault(port, MockFault::Read) {
            return Err(Self::fault_error(MockFault::Read));
        }
        if let Some(byte) = self.try_pop(port) {
            return Ok(Some(byte));
        }
        // Behave like a blocking port: wait out the timeout, then look once more.
        thread::sleep(timeout);
        Ok(self.try_pop(port))
    }

    fn purge(&self, port: &PortId) -> Result<(), PortError> {
        let mut state = self.state.lock();
        if state.take_fault(port, MockFault::Purge) {
            return Err(Self::fault_error(MockFault::Purge));
        }
        state.port(port).rx.clear();
        state.log.push(TransportCall::Purge(port.clone()));
        Ok(())
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("ports", &state.ports.len())
            .field("calls", &state.log.len())
            .finish()
    }
}
