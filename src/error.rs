//! Startup error taxonomy. Every variant is fatal and ends the process with exit code 1.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StartupError {
    /// Bad command line, malformed or empty zone JSON, invalid settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// Detector model or label assets missing or unreadable.
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// The stream could not be opened at startup.
    #[error("stream error: {0}")]
    Stream(String),
}
