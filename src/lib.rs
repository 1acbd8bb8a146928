//! Lambda Link Library
//!
//! Serial command/acknowledgement engine and device adapters for Sutter
//! Lambda style controllers (filter wheels, shutters, the VF-5 tunable filter, the DG-4).
//!
//! # Modules
//!
//! - `port`: Transport abstraction, `serialport` backend and a scriptable mock
//! - `registry`: Process-wide per-port lock and busy-flag table
//! - `protocol`: Command engine (write, echo verification, terminator wait)
//! - `devices`: Hub, wheel, shutter and tunable filter adapters
//! - `error`: Adapter-level errors with user-facing messages
//! - `config`: Configuration management with TOML support
//! - `logging`: `tracing-subscriber` initialisation
//!
//! # Example
//!
//! ```
//! use lambda_link::devices::{FilterWheel, LambdaHub, WheelId};
//! use lambda_link::port::MockTransport;
//! use lambda_link::protocol::CommandEngine;
//! use lambda_link::registry::PortRegistry;
//! use std::sync::Arc;
//!
//! let mock = MockTransport::new();
//! mock.echo_commands(&"COM3".into(), true);
//!
//! let engine = CommandEngine::with_registry(Arc::new(mock), Arc::new(PortRegistry::new()));
//! let hub = Arc::new(LambdaHub::new("COM3", engine));
//! let wheel = FilterWheel::new(Arc::clone(&hub), WheelId::A);
//!
//! wheel.set_position(4)?;
//! assert_eq!(wheel.position(), 4);
//! # Ok::<(), lambda_link::DeviceError>(())
//! ```

pub mod config;
pub mod devices;
pub mod error;
pub mod logging;
pub mod port;
pub mod protocol;
pub mod registry;

// Re-export commonly used types for convenience
pub use devices::{
    ControllerInfo, ControllerType, FilterWheel, LambdaHub, LambdaVf5, PropertyValue, Shutter,
    SubDevice,
};
pub use error::{ConnectError, DeviceError, DeviceResult};
pub use port::{
    DataBits, FlowControl, MockTransport, Parity, PortConfiguration, PortError, PortId,
    SerialPortTransport, StopBits, Transport,
};
pub use protocol::{
    Command, CommandEngine, Completed, EchoSpec, Exchange, ProtocolError, ProtocolResult,
    TERMINATOR,
};
pub use registry::{PortRegistry, PortState};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
