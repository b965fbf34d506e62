//! Error taxonomy for the acquisition engine
//!
//! Every data-path error is local to one acquisition iteration: the worker
//! reports it and retries on the next pull. Only [`AcquisitionError::Allocation`]
//! ends a session.

use crate::acquisition::engine::EngineState;
use crate::adapter::Protocol;
use thiserror::Error;

/// Errors that can occur during acquisition engine operations
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Could not bind socket to port {port}: {source}")]
    BindFailure {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket bound to port {port} but no data arrived within {timeout_ms}ms")]
    ConnectTimeout { port: u16, timeout_ms: u64 },

    #[error("Data shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Stream negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("Acquisition worker did not exit within {timeout_ms}ms")]
    StopTimeout { timeout_ms: u64 },

    #[error("Operation requires an idle engine (current state: {0:?})")]
    NotIdle(EngineState),

    #[error("No input source connected")]
    NotConnected,

    #[error("A previous acquisition worker is still running")]
    WorkerStillRunning,

    #[error("Protocol {0} is not implemented")]
    Unsupported(Protocol),

    #[error("Pull cancelled by stop request")]
    Cancelled,

    #[error("Failed to allocate buffers for {requested} samples")]
    Allocation { requested: usize },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AcquisitionError {
    /// Whether the engine can keep running (or retry) after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AcquisitionError::Allocation { .. })
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AcquisitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = AcquisitionError::ShapeMismatch {
            expected: 1600,
            actual: 1599,
        };
        assert_eq!(
            err.to_string(),
            "Data shape mismatch: expected 1600, got 1599"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_allocation_is_fatal() {
        let err = AcquisitionError::Allocation { requested: 42 };
        assert!(!err.is_recoverable());
        assert!(AcquisitionError::StopTimeout { timeout_ms: 500 }.is_recoverable());
        assert!(AcquisitionError::NotConnected.is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: AcquisitionError = io.into();
        assert!(matches!(err, AcquisitionError::Io(_)));
    }
}
