//! Serial command/acknowledgement protocol.
//!
//! Lambda-family controllers acknowledge a command by echoing each byte back,
//! then signal completion with a carriage return:
//!
//! ```text
//! host        ──► cmd[0] cmd[1] ...
//! controller  ◄── echo[0] echo[1] ... [payload ...] 0x0D
//! ```
//!
//! Some firmware echoes a substitute byte instead (the SC echoes "close" for
//! "open" and vice versa, a 10-2 sometimes echoes only the wheel position).
//! Those quirks are expressed as data through [`EchoSpec::with_alternate`];
//! the [`CommandEngine`] handles every variant with one code path.

mod engine;
mod error;

pub use engine::{CommandEngine, EngineOptions, DEFAULT_POLL_INTERVAL, DEFAULT_SETTLE_TIME};
pub use error::ProtocolError;

use std::fmt;
use std::time::Duration;

/// Byte the controller sends when it considers an exchange complete.
pub const TERMINATOR: u8 = 0x0D;

/// Result of one command exchange.
pub type ProtocolResult = Result<Completed, ProtocolError>;

/// An immutable sequence of bytes transmitted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(Vec<u8>);

impl Command {
    /// Create a command from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The bytes to transmit.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Command {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Command {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Command {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&HexBytes(&self.0), f)
    }
}

/// What the controller is expected to echo for a command.
///
/// `primary` holds one byte per command byte. The optional `alternate` track
/// is consulted, with its own cursor, whenever a received byte does not match
/// the primary byte of the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoSpec {
    primary: Vec<u8>,
    alternate: Option<Vec<u8>>,
}

impl EchoSpec {
    /// Expect the given primary echo and no alternate.
    pub fn new(primary: impl Into<Vec<u8>>) -> Self {
        Self {
            primary: primary.into(),
            alternate: None,
        }
    }

    /// Expect the command to be echoed byte for byte.
    pub fn verbatim(command: &Command) -> Self {
        Self::new(command.as_bytes())
    }

    /// Also accept `alternate` bytes as echoes. An empty alternate means none.
    pub fn with_alternate(mut self, alternate: impl Into<Vec<u8>>) -> Self {
        let alternate = alternate.into();
        self.alternate = (!alternate.is_empty()).then_some(alternate);
        self
    }

    pub fn primary(&self) -> &[u8] {
        &self.primary
    }

    pub fn alternate(&self) -> Option<&[u8]> {
        self.alternate.as_deref()
    }

    /// Check that this spec can verify `command`.
    pub fn validate(&self, command: &Command) -> Result<(), ProtocolError> {
        if command.is_empty() {
            return Err(ProtocolError::invalid("command is empty"));
        }
        if self.primary.len() != command.len() {
            return Err(ProtocolError::invalid(format!(
                "primary echo has {} byte(s) but the command has {}",
                self.primary.len(),
                command.len()
            )));
        }
        if let Some(alternate) = &self.alternate {
            if alternate.len() > command.len() {
                return Err(ProtocolError::invalid(format!(
                    "alternate echo has {} byte(s) but the command has only {}",
                    alternate.len(),
                    command.len()
                )));
            }
        }
        Ok(())
    }
}

/// A complete request: command, echo expectation and phase settings.
///
/// ```
/// use lambda_link::protocol::Exchange;
/// use std::time::Duration;
///
/// // Shutter A open; the SC sometimes echoes "close" instead.
/// let open = Exchange::new([170]).alternate_echo([172]);
/// assert!(open.expects_terminator());
///
/// // Go-online is echoed but never terminated.
/// let online = Exchange::new([0xEE]).no_terminator().timeout(Duration::from_millis(50));
/// assert!(!online.expects_terminator());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    command: Command,
    echo: EchoSpec,
    timeout: Option<Duration>,
    expect_terminator: bool,
}

impl Exchange {
    /// An exchange expecting a verbatim echo followed by the terminator.
    pub fn new(command: impl Into<Command>) -> Self {
        let command = command.into();
        let echo = EchoSpec::verbatim(&command);
        Self {
            command,
            echo,
            timeout: None,
            expect_terminator: true,
        }
    }

    /// Accept `alternate` as a fallback echo track.
    pub fn alternate_echo(mut self, alternate: impl Into<Vec<u8>>) -> Self {
        self.echo = self.echo.with_alternate(alternate);
        self
    }

    /// Replace the echo expectation entirely.
    pub fn echo(mut self, echo: EchoSpec) -> Self {
        self.echo = echo;
        self
    }

    /// Use `timeout` for each phase instead of the port default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Finish after the echo; the controller sends no terminator.
    pub fn no_terminator(mut self) -> Self {
        self.expect_terminator = false;
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn echo_spec(&self) -> &EchoSpec {
        &self.echo
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn expects_terminator(&self) -> bool {
        self.expect_terminator
    }
}

/// A successfully completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    /// Bytes received between the echo and the terminator (terminator excluded).
    pub response: Vec<u8>,
    /// Whether at least one position was matched through the alternate track.
    pub alternate_echo: bool,
    /// Wall-clock time from lock acquisition to completion.
    pub elapsed: Duration,
}

/// Formats a byte slice as space-separated hex, for log fields.
#[derive(Debug, Clone, Copy)]
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:#04x}")?;
        }
        Ok(())
    }
}
