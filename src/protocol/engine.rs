//! The command protocol engine.

use super::{Command, Completed, EchoSpec, Exchange, HexBytes, ProtocolError, ProtocolResult, TERMINATOR};
use crate::port::{PortError, PortId, Transport};
use crate::registry::PortRegistry;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, trace, warn};

/// Longest single wait on the transport inside a read loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Pause between writing an unacknowledged command and purging its echo.
///
/// Controllers echo within ~100 µs; 5 ms covers three bytes at 9600 baud.
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(5);

/// Longest wait of a single phase; larger timeouts are clamped to it.
const MAX_PHASE_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Tunables of the engine that are not per-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Upper bound of each read attempt while waiting for a byte.
    pub poll_interval: Duration,
    /// Settle time used by [`CommandEngine::send_unacknowledged`].
    pub settle_time: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_time: DEFAULT_SETTLE_TIME,
        }
    }
}

/// Drives write / echo-verify / terminator-wait exchanges over a transport,
/// serializing callers per port through the [`PortRegistry`].
///
/// Cloning is cheap; clones share the transport and registry.
///
/// # Example
/// ```
/// use lambda_link::port::{MockTransport, PortId};
/// use lambda_link::protocol::{CommandEngine, Exchange};
/// use lambda_link::registry::PortRegistry;
/// use std::sync::Arc;
///
/// let mock = MockTransport::new();
/// let port = PortId::new("MOCK0");
/// mock.script_reply(&port, &[0xAC, 0x0D]); // SC echoing "close" for "open"
///
/// let engine = CommandEngine::with_registry(Arc::new(mock), Arc::new(PortRegistry::new()));
/// let done = engine.send(&port, &Exchange::new([0xAA]).alternate_echo([0xAC]))?;
/// assert!(done.response.is_empty());
/// assert!(done.alternate_echo);
/// # Ok::<(), lambda_link::protocol::ProtocolError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CommandEngine {
    transport: Arc<dyn Transport>,
    registry: Arc<PortRegistry>,
    options: EngineOptions,
}

impl CommandEngine {
    /// Create an engine over `transport` using the process-wide registry.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_registry(transport, PortRegistry::global())
    }

    /// Create an engine over `transport` using a specific registry.
    pub fn with_registry(transport: Arc<dyn Transport>, registry: Arc<PortRegistry>) -> Self {
        Self {
            transport,
            registry,
            options: EngineOptions::default(),
        }
    }

    /// Replace the engine options.
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Whether a command is in flight on `port`. Diagnostic only.
    pub fn is_busy(&self, port: &PortId) -> bool {
        self.registry.get(port).is_some_and(|state| state.is_busy())
    }

    /// Run an [`Exchange`] on `port`.
    pub fn send(&self, port: &PortId, exchange: &Exchange) -> ProtocolResult {
        self.execute(
            port,
            exchange.command(),
            exchange.echo_spec(),
            exchange.timeout_override(),
            exchange.expects_terminator(),
        )
    }

    /// Transmit `command` and verify the controller's acknowledgement.
    ///
    /// Blocks until the port is free, purges stale input, writes the command
    /// and matches one echo byte per command byte. With `expect_terminator`
    /// it then collects bytes until [`TERMINATOR`]. Each of the two phases
    /// gets its own `timeout` budget (the port default when `None`).
    ///
    /// The port lock and busy flag are released on every exit path.
    pub fn execute(
        &self,
        port: &PortId,
        command: &Command,
        echo: &EchoSpec,
        timeout: Option<Duration>,
        expect_terminator: bool,
    ) -> ProtocolResult {
        echo.validate(command)?;

        let span = debug_span!("execute", port = %port, command = %command);
        let _enter = span.enter();

        let state = self.registry.get_or_create(port);
        let timeout = timeout.unwrap_or_else(|| state.default_timeout());

        let _guard = state.acquire();
        let started = Instant::now();

        let result = self.exchange(port, command, echo, timeout, expect_terminator, started);
        match &result {
            Ok(done) => debug!(
                response = %HexBytes(&done.response),
                alternate_echo = done.alternate_echo,
                elapsed_ms = done.elapsed.as_millis() as u64,
                "command completed"
            ),
            Err(e) => warn!(
                kind = e.kind(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "command failed: {e}"
            ),
        }
        result
    }

    /// Transmit `command` without waiting for any acknowledgement.
    ///
    /// The echo the controller produces anyway is given `settle_time` to
    /// arrive and then purged, so it cannot be mistaken for the next reply.
    pub fn send_unacknowledged(&self, port: &PortId, command: &Command) -> Result<(), ProtocolError> {
        if command.is_empty() {
            return Err(ProtocolError::invalid("command is empty"));
        }

        let state = self.registry.get_or_create(port);
        let _guard = state.acquire();

        self.transport.purge(port)?;
        self.transport.write(port, command.as_bytes())?;
        thread::sleep(self.options.settle_time);
        self.transport.purge(port)?;
        debug!(port = %port, command = %command, "unacknowledged command sent");
        Ok(())
    }

    fn exchange(
        &self,
        port: &PortId,
        command: &Command,
        echo: &EchoSpec,
        timeout: Duration,
        expect_terminator: bool,
        started: Instant,
    ) -> ProtocolResult {
        self.transport.purge(port)?;
        self.transport.write(port, command.as_bytes())?;

        let alternate_echo = self.verify_echo(port, echo, timeout)?;
        let response = if expect_terminator {
            self.await_terminator(port, timeout)?
        } else {
            Vec::new()
        };

        Ok(Completed {
            response,
            alternate_echo,
            elapsed: started.elapsed(),
        })
    }

    /// Match one received byte per command position. Returns whether any
    /// position was matched through the alternate track.
    fn verify_echo(&self, port: &PortId, echo: &EchoSpec, timeout: Duration) -> Result<bool, ProtocolError> {
        let primary = echo.primary();
        let alternate = echo.alternate().unwrap_or_default();
        let deadline = deadline_after(timeout);

        // The alternate track is matched at the current position or at its own
        // cursor, which only advances when the alternate track is used. A
        // shorter alternate (wheel C echoing only `[pos]`) relies on the cursor.
        let mut alt_cursor = 0;
        let mut used_alternate = false;

        for (position, &expected) in primary.iter().enumerate() {
            let mut stray = None;
            loop {
                let Some(byte) = self.next_byte(port, deadline)? else {
                    return Err(match stray {
                        Some(byte) => ProtocolError::UnexpectedByte { position, byte },
                        None => ProtocolError::EchoTimeout { matched: position },
                    });
                };

                if byte == expected {
                    break;
                }
                let alt_index = [alt_cursor, position]
                    .into_iter()
                    .find(|&i| alternate.get(i) == Some(&byte));
                if let Some(index) = alt_index {
                    debug!(position, byte, alt_index = index, "echo matched via alternate track");
                    alt_cursor = index + 1;
                    used_alternate = true;
                    break;
                }
                if byte == TERMINATOR {
                    return Err(ProtocolError::PrematureTerminator { matched: position });
                }

                warn!(position, byte, expected, "unexpected byte while awaiting echo");
                stray = Some(byte);
            }
        }

        Ok(used_alternate)
    }

    /// Collect bytes until the terminator; the terminator is not returned.
    fn await_terminator(&self, port: &PortId, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let deadline = deadline_after(timeout);
        let mut response = Vec::new();

        loop {
            match self.next_byte(port, deadline)? {
                Some(TERMINATOR) => return Ok(response),
                Some(byte) => {
                    trace!(byte, "response byte");
                    response.push(byte);
                }
                None => {
                    return Err(ProtocolError::CompletionTimeout {
                        received: response.len(),
                    })
                }
            }
        }
    }

    /// Poll the transport in short slices until a byte arrives or `deadline` passes.
    fn next_byte(&self, port: &PortId, deadline: Instant) -> Result<Option<u8>, PortError> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let slice = (deadline - now).min(self.options.poll_interval);
            if let Some(byte) = self.transport.read_byte(port, slice)? {
                return Ok(Some(byte));
            }

            // Transports that return immediately must not turn this into a spin.
            let spent = now.elapsed();
            if spent < slice {
                thread::sleep(slice - spent);
            }
        }
    }
}

/// Deadline `timeout` from now, clamped for timeouts too large to represent.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(MAX_PHASE_WAIT))
        .unwrap_or(now)
}
