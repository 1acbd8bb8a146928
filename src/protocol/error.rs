//! Failure kinds of a single command exchange.

use crate::port::PortError;
use thiserror::Error;

/// Why a command exchange did not complete.
///
/// The engine never retries and never downgrades one of these to success;
/// callers decide whether a retry makes sense (see [`ProtocolError::is_retryable`]).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The caller supplied an empty command or an echo spec that does not fit it.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// No echo byte arrived for a command position within the echo-phase timeout.
    #[error("no echo from controller after {matched} of the command bytes")]
    EchoTimeout { matched: usize },

    /// A byte arrived that matched neither echo track nor the terminator, and
    /// nothing resolved the position before the timeout.
    #[error("unexpected byte {byte:#04x} while waiting for echo of position {position}")]
    UnexpectedByte { position: usize, byte: u8 },

    /// The terminator arrived before every command byte had been echoed.
    #[error("controller terminated the exchange after echoing {matched} byte(s)")]
    PrematureTerminator { matched: usize },

    /// The echo was verified but no terminator arrived in time.
    #[error("command echoed but not completed ({received} byte(s) received before timeout)")]
    CompletionTimeout { received: usize },

    /// The transport failed; the device may be disconnected.
    #[error("transport failure: {0}")]
    Transport(#[from] PortError),
}

impl ProtocolError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidCommand(message.into())
    }

    /// Whether re-issuing the same command once is reasonable.
    ///
    /// Only a missing echo qualifies; it is the failure most plausibly caused
    /// by line noise. Transport failures in particular are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EchoTimeout { .. })
    }

    /// Short stable name of the failure kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCommand(_) => "invalid_command",
            Self::EchoTimeout { .. } => "echo_timeout",
            Self::UnexpectedByte { .. } => "unexpected_byte",
            Self::PrematureTerminator { .. } => "premature_terminator",
            Self::CompletionTimeout { .. } => "completion_timeout",
            Self::Transport(_) => "transport_failure",
        }
    }
}
