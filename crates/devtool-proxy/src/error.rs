//! Error types for proxy control and traffic ingestion.

use std::path::PathBuf;

use thiserror::Error;

pub use devtool_core::DecodeError;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Process supervision error.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Control-plane error.
    #[error("control plane error: {0}")]
    Control(#[from] ControlError),

    /// Live stream error.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Certificate installation error.
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

/// Errors from starting or stopping the proxy process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A proxy process is already supervised.
    #[error("proxy is already running")]
    AlreadyRunning,

    /// The proxy executable is missing from the resource directory.
    #[error("proxy binary not found at {0}")]
    BinaryNotFound(PathBuf),

    /// The executable exists but could not be launched.
    #[error("failed to spawn proxy: {0}")]
    Spawn(#[source] std::io::Error),

    /// The termination signal could not be delivered.
    #[error("failed to signal proxy: {0}")]
    Signal(String),
}

/// Errors from control-plane requests.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Host and port do not form a valid URL.
    #[error("invalid control plane URL: {0}")]
    InvalidUrl(String),

    /// The transport did not yield a well-formed HTTP response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The proxy answered with a non-2xx status.
    #[error("HTTP error: {0}")]
    Http(u16),

    /// The body did not match the expected schema.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        ControlError::Decode(DecodeError::Json(err))
    }
}

impl From<reqwest::Error> for ControlError {
    fn from(err: reqwest::Error) -> Self {
        ControlError::InvalidResponse(err.to_string())
    }
}

/// Errors from opening the live event stream.
///
/// Failures after the stream is running are reported through
/// [`crate::stream::StreamStatus`] instead.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Host and port do not form a valid WebSocket URL.
    #[error("invalid stream URL: {0}")]
    InvalidUrl(String),
}

/// Errors from installing the proxy CA certificate.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// The certificate URL could not be built.
    #[error("could not build the certificate URL: {0}")]
    InvalidUrl(String),

    /// The transport did not yield a well-formed HTTP response.
    #[error("invalid response from the certificate endpoint: {0}")]
    InvalidResponse(String),

    /// The certificate endpoint did not answer 200.
    #[error("certificate download failed (HTTP {0})")]
    DownloadFailed(u16),

    /// The downloaded body is not a certificate.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Writing the temporary certificate file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The trust-store command exited unsuccessfully.
    #[error("could not install the certificate: {0}")]
    CommandFailed(String),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;
