//! Error types for the sliding-window engine.

use thiserror::Error;

/// Main error type for window lifecycle and configuration operations.
///
/// The data path (`add`, `acquire`, `total`) never produces one of these.
#[derive(Error, Debug)]
pub enum WindowError {
    /// `start` called on a window that is already running
    #[error("rolling window has already started")]
    AlreadyStarted,

    /// `stop` called on a window that is not running
    #[error("rolling window has already stopped")]
    AlreadyStopped,

    /// Metric registration attempted after `start`
    #[error("cannot register a metric while the rolling window is started")]
    RegisterWhileStarted,

    /// Window timing parameters cannot drive a rotation ticker
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    /// Per-slice admission budget truncated to zero
    #[error("concurrency {concurrency} over {num_buckets} buckets leaves a zero per-bucket budget")]
    ZeroBudget { concurrency: i32, num_buckets: usize },

    /// `start` needs a tokio runtime to host the rotation worker
    #[error("no tokio runtime available to run the rotation worker")]
    NoRuntime,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<::config::ConfigError> for WindowError {
    fn from(err: ::config::ConfigError) -> Self {
        WindowError::Config(err.to_string())
    }
}

/// Result type alias for window operations.
pub type Result<T> = std::result::Result<T, WindowError>;
