//! Error types for discovery, capture sessions and conversion.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;
use crate::session::SessionState;
use crate::traits::FourCC;

/// Error type for capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// No usable capture device.
    #[error("No capture device found: {0}")]
    NotFound(String),

    /// The device lacks a capability the session needs.
    #[error("Device {path} does not support {missing}")]
    Capability {
        /// Device node.
        path: PathBuf,
        /// Name of the missing capability.
        missing: &'static str,
    },

    /// The driver granted fewer buffers than requested.
    #[error("Device granted {granted} of {requested} buffers")]
    InsufficientBuffers {
        /// Buffers requested.
        requested: u32,
        /// Buffers granted.
        granted: u32,
    },

    /// A granted buffer could not be mapped into process memory.
    #[error("Failed to map buffer {index}: {source}")]
    MapFailed {
        /// Slot index.
        index: u32,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// No frame became ready within the wait window.
    #[error("No frame ready within {0:?}")]
    Timeout(Duration),

    /// Enqueueing the pool or starting the stream failed.
    #[error("Failed to start streaming: {0}")]
    StreamStart(#[source] io::Error),

    /// The driver broke the buffer ownership contract.
    #[error("Buffer invariant violated: {0}")]
    InvariantViolation(String),

    /// Operation not allowed in the current session state.
    #[error("Cannot {op} while session is {state:?}")]
    InvalidState {
        /// Attempted operation.
        op: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// A device call failed.
    #[error("{op} failed: {source}")]
    Device {
        /// Name of the failing call.
        op: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Frame conversion failed.
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CaptureError {
    pub(crate) const fn device(op: &'static str, source: io::Error) -> Self {
        Self::Device { op, source }
    }
}

/// Error type for pixel conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    /// The pixel format has no converter.
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(FourCC),

    /// Text could not be turned into a pixel format tag.
    #[error("Invalid pixel format tag: {0:?}")]
    InvalidTag(String),

    /// The raw frame is smaller than its resolution requires.
    #[error("Source frame holds {actual} bytes, expected at least {expected}")]
    SourceTooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The RGB buffer does not match the output size.
    #[error("Destination holds {actual} bytes, expected {expected}")]
    DestinationSize {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
