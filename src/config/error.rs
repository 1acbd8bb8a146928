//! Errors raised while locating, reading, validating or saving configuration.

use std::path::PathBuf;
use thiserror::Error;

/// What the loader was doing when a file operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Read,
    Write,
}

impl FileAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named config file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to {} configuration file '{}': {source}", .action.as_str(), .path.display())]
    Io {
        action: FileAction,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A value is outside what the hub and adapters accept.
    #[error("invalid configuration value for '{key}': {message}")]
    ValidationError { key: String, message: String },

    /// A `LAMBDA_LINK_*` override could not be parsed.
    #[error("invalid environment override {var}: {message}")]
    EnvOverride { var: String, message: String },

    /// `save` was called on a configuration that was not loaded from a file.
    #[error("configuration has no file path; use save_to")]
    NoPath,
}

impl ConfigError {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn env_override(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EnvOverride {
            var: var.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(action: FileAction, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
