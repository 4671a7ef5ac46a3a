//! Error types for comfy-provision

use thiserror::Error;

/// Result type alias using comfy-provision Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in provisioning operations
#[derive(Error, Debug)]
pub enum Error {
    /// Manifest source unreachable or unparseable
    #[error("Manifest unavailable: {0}")]
    ManifestUnavailable(String),

    /// Accelerator exited non-zero or could not be spawned
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Source file for an inspector is missing or unreadable
    #[error("Inspection unavailable: {0}")]
    InspectionUnavailable(String),

    /// Backing log file momentarily unreadable
    #[error("Log source error: {0}")]
    LogSource(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Archive errors
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}
