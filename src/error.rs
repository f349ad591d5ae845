//! Error types for the link manager

use std::io;
use thiserror::Error;

/// Result type alias using LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

/// Link error taxonomy
///
/// Transport failures are translated into these at the transport boundary
/// and surface to the caller as `Error` events; they never unwind into the
/// caller's task.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Device/port enumeration failed
    #[error("Scan error: {0}")]
    Scan(String),

    /// Link establishment failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Write attempted without a live link
    #[error("Not connected to a device")]
    NotConnected,

    /// Write attempted before the write characteristic was resolved
    #[error("Write characteristic not set")]
    NotConfigured,

    /// Bounded wait exceeded on an operation marshalled onto the worker
    #[error("Operation timed out after {0:?}")]
    OperationTimeout(std::time::Duration),

    /// Every reconnect attempt failed
    #[error("Reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// A scan or connect is already in flight on this manager
    #[error("Already running")]
    AlreadyRunning,

    /// Target does not fit the transport or is malformed
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The worker went away before answering
    #[error("Worker stopped")]
    WorkerStopped,

    /// BlueZ error
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    /// Serial port error
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    pub fn scan(cause: impl std::fmt::Display) -> Self {
        Self::Scan(cause.to_string())
    }

    pub fn connection(cause: impl std::fmt::Display) -> Self {
        Self::Connection(cause.to_string())
    }

    pub fn invalid_target(reason: impl Into<String>) -> Self {
        Self::InvalidTarget(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_messages() {
        assert_eq!(
            LinkError::ReconnectExhausted { attempts: 2 }.to_string(),
            "Reconnect failed after 2 attempts"
        );
        assert_eq!(LinkError::NotConfigured.to_string(), "Write characteristic not set");
        assert_eq!(
            LinkError::scan("adapter missing").to_string(),
            "Scan error: adapter missing"
        );
        assert_eq!(
            LinkError::OperationTimeout(Duration::from_secs(10)).to_string(),
            "Operation timed out after 10s"
        );
    }
}
