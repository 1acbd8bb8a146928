//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult, FileAction};
use super::schema::{Config, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "LAMBDA_LINK";

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file name looked up in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "lambda-link.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "LAMBDA_LINK_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `LAMBDA_LINK_CONFIG` environment variable (explicit path)
    /// 2. `./lambda-link.toml` (current directory)
    /// 3. `lambda-link/config.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        if apply_env_overrides(&mut config).is_err() || config.validate().is_err() {
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to file.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self.config_path.as_ref().ok_or(ConfigError::NoPath)?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "{CONFIG_PATH_ENV} points to a missing file");
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    get_default_config_path().filter(|path| path.exists())
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "lambda-link").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::io(FileAction::Read, path, e))?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(FileAction::Write, path, e))?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::io(FileAction::Write, path, e))
}

fn env_var(key: &str) -> Option<(String, String)> {
    let var = format!("{ENV_PREFIX}_{key}");
    std::env::var(&var).ok().map(|value| (var, value))
}

fn parse_env<T: FromStr>(var: &str, value: &str, what: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_override(var, format!("Invalid {what}: \"{value}\"")))
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `LAMBDA_LINK_<SECTION>_<KEY>`
/// For example:
/// - `LAMBDA_LINK_HUB_PORT=COM3`
/// - `LAMBDA_LINK_PROTOCOL_ANSWER_TIMEOUT_MS=2000`
/// - `LAMBDA_LINK_WHEELS_A_SPEED=5`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let Some((var, val)) = env_var("SERIAL_BAUD_RATE") {
        config.serial.baud_rate = parse_env(&var, &val, "baud rate")?;
    }
    if let Some((var, val)) = env_var("SERIAL_READ_TIMEOUT_MS") {
        config.serial.read_timeout_ms = parse_env(&var, &val, "timeout")?;
    }

    // Protocol overrides
    if let Some((var, val)) = env_var("PROTOCOL_ANSWER_TIMEOUT_MS") {
        config.protocol.answer_timeout_ms = parse_env(&var, &val, "timeout")?;
    }
    if let Some((var, val)) = env_var("PROTOCOL_POLL_INTERVAL_MS") {
        config.protocol.poll_interval_ms = parse_env(&var, &val, "interval")?;
    }
    if let Some((var, val)) = env_var("PROTOCOL_ECHO_TIMEOUT_RETRIES") {
        config.protocol.echo_timeout_retries = parse_env(&var, &val, "retry count")?;
    }
    if let Some((var, val)) = env_var("PROTOCOL_UNACKNOWLEDGED_SETTLE_MS") {
        config.protocol.unacknowledged_settle_ms = parse_env(&var, &val, "settle time")?;
    }
    if let Some((var, val)) = env_var("PROTOCOL_GO_ONLINE_ATTEMPTS") {
        config.protocol.go_online_attempts = parse_env(&var, &val, "attempt count")?;
    }

    // Hub overrides (TEST_PORT is honoured for hardware test runs)
    if let Some((_, val)) = env_var("HUB_PORT") {
        config.hub.port = Some(val);
    } else if let Ok(val) = std::env::var("TEST_PORT") {
        config.hub.port = Some(val);
    }
    if let Some((var, val)) = env_var("HUB_CONTROLLER_TYPE") {
        config.hub.controller_type = Some(parse_env(&var, &val, "controller type")?);
    }

    // Wheel overrides
    for (name, wheel) in [
        ("A", &mut config.wheels.a),
        ("B", &mut config.wheels.b),
        ("C", &mut config.wheels.c),
    ] {
        if let Some((var, val)) = env_var(&format!("WHEELS_{name}_SPEED")) {
            wheel.speed = parse_env(&var, &val, "speed")?;
        }
        if let Some((var, val)) = env_var(&format!("WHEELS_{name}_CLOSED_POSITION")) {
            wheel.closed_position = parse_env(&var, &val, "position")?;
        }
    }

    // Logging overrides
    if let Some((_, val)) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let Some((var, val)) = env_var("LOGGING_FORMAT") {
        config.logging.format = parse_env::<LogFormat>(&var, &val, "log format")?;
    }

    Ok(())
}
