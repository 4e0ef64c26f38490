//! Error types for ear-core.

use thiserror::Error;

/// Error type for recorder and analysis operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// `start()` was called before the audio device reported a sample rate.
    #[error("No sample rate known; the audio device is not running")]
    NoSampleRate,

    /// The analysis thread did not exit within the stop timeout. The thread
    /// is detached and keeps its resources until it finishes on its own.
    #[error("Analysis thread did not stop within {timeout_ms} ms (thread leaked)")]
    ShutdownTimeout { timeout_ms: u64 },

    #[error("Analysis thread panicked")]
    AnalysisPanicked,

    #[error("Failed to spawn analysis thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
