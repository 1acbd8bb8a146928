//! TOML configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `LAMBDA_LINK_CONFIG` environment variable (explicit path)
//! 2. `./lambda-link.toml` (current directory)
//! 3. `lambda-link/config.toml` in the platform config directory
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any configuration value can be overridden via environment variables.
//! The pattern is: `LAMBDA_LINK_<SECTION>_<KEY>`
//!
//! Examples:
//! - `LAMBDA_LINK_HUB_PORT=COM3`
//! - `LAMBDA_LINK_PROTOCOL_ANSWER_TIMEOUT_MS=2000`
//! - `LAMBDA_LINK_LOGGING_FORMAT=json`
//!
//! `TEST_PORT` is also honoured as the hub port, for hardware test runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use lambda_link::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("answer timeout: {} ms", config.protocol.answer_timeout_ms);
//! # Ok::<(), lambda_link::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, HubConfig, LogFormat, LoggingConfig, ProtocolConfig, SerialConfig, WheelConfig,
    WheelsConfig,
};
