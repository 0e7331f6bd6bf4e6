//! Error types for switch-gate

use thiserror::Error;

use crate::router::Mode;

/// Main error type for switch-gate
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid mode: {0}")]
    ModeInvalid(String),

    #[error("mode {0} is not available")]
    ModeNotAvailable(Mode),

    #[error("home proxy limit exhausted ({used_mb} MB used)")]
    HomeLimitExhausted { used_mb: u64 },

    #[error("{0}")]
    InterfaceDown(String),

    #[error("timeout")]
    Timeout,

    #[error("{0} unreachable")]
    Unreachable(Mode),

    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Result type alias for switch-gate
pub type Result<T> = std::result::Result<T, Error>;
