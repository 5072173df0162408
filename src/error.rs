//! Error types for the capture, detection and broker stages

use std::time::Duration;

use thiserror::Error;

/// Errors raised while opening or reading the video stream
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open stream {locator}: {reason}")]
    Open { locator: String, reason: String },
    #[error("Failed to read frame: {0}")]
    Read(String),
    #[error("No frame received from stream for {0:?}")]
    Stale(Duration),
    #[error("Stream decoding is not available: {0}")]
    Unsupported(String),
}

/// Errors raised by a single detection request. None of these are fatal.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Failed to encode frame: {0}")]
    Encoding(#[from] image::ImageError),
    #[error("Detection request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected detection response: {0}")]
    Protocol(String),
}

/// Errors raised by the message broker session
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to connect to {host} after {attempts} attempts")]
    Exhausted { host: String, attempts: u32 },
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("Broker operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Broker connection is closed")]
    Closed,
}

/// Errors writing a detection snapshot to disk
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PNG encoding failed: {0}")]
    Encoding(#[from] png::EncodingError),
    #[error("Failed to serialize metadata: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fatal error categories, exposed so a supervisor can tell them apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    StreamOpen,
    StreamStale,
    Broker,
    Io,
}

/// Errors that end the process
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Capture(CaptureError::Stale(_)) => ErrorKind::StreamStale,
            Error::Capture(_) => ErrorKind::StreamOpen,
            Error::Broker(_) => ErrorKind::Broker,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config => 2,
            ErrorKind::StreamOpen => 3,
            ErrorKind::StreamStale => 4,
            ErrorKind::Broker => 5,
            ErrorKind::Io => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
