//! Transport abstraction layer for serial communication.
//!
//! Provides the `Transport` trait the command engine drives, a `serialport`
//! backed implementation and a scriptable mock for tests.

pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use error::PortError;
pub use mock::{MockFault, MockTransport, Responder, TransportCall};
pub use sync_port::*;
pub use traits::*;
