//! Error types for the sensor and its upstream source

use thiserror::Error;

/// Failure of one upstream (host camera) operation
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("host channel i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("host rejected `{query}`: {reason}")]
    Rejected { query: String, reason: String },

    #[error("malformed reply to `{query}`: {detail}")]
    Protocol { query: String, detail: String },

    #[error("host channel is not connected")]
    NotConnected,

    /// Status code reported by a client that only speaks errno
    #[error("upstream status {0}")]
    Status(i32),
}

impl UpstreamError {
    /// Negative errno view of the failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            Self::Rejected { .. } => -libc::EINVAL,
            Self::Protocol { .. } => -libc::EPROTO,
            Self::NotConnected => -libc::ENOTCONN,
            Self::Status(code) => *code,
        }
    }
}

/// Errors returned from the sensor lifecycle API
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("upstream transport error ({code}): {0}", code = .0.code())]
    Transport(#[from] UpstreamError),

    #[error("sensor worker is already running")]
    AlreadyRunning,

    #[error("failed to spawn sensor worker: {0}")]
    Spawn(std::io::Error),

    #[error("sensor worker panicked")]
    WorkerPanicked,
}

/// Why one buffer of a request produced no output. Logged by the worker,
/// never returned to callers.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport: {0}")]
    Transport(#[from] UpstreamError),

    #[error("misconfigured buffer: {0}")]
    Misconfigured(String),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}
