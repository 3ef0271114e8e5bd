//! Error types for loopcast-rd
//!
//! Defines module-specific error types using thiserror. Selection, download,
//! probe, swap and persistence failures each have their own variant so the
//! coordinator can decide locally which ones are recoverable.

use crate::download::DownloadError;
use crate::swap::SwapError;
use thiserror::Error;

/// Main error type for loopcast-rd
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors bubbled up from loopcast-common
    #[error(transparent)]
    Common(#[from] loopcast_common::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Catalog is empty: nothing can be selected
    #[error("No items available in catalog")]
    NoItemsAvailable,

    /// Catalog query failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Transfer failed (network, HTTP status, disk)
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Duration could not be determined
    #[error("Probe error: {0}")]
    Probe(String),

    /// Slot rename protocol failed
    #[error("Swap error: {0}")]
    Swap(#[from] SwapError),

    /// Rotation state write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using loopcast-rd Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable category, reported in status and API errors
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) | Error::Common(_) => "database",
            Error::Http(_) => "http",
            Error::NoItemsAvailable => "selection",
            Error::Catalog(_) => "catalog",
            Error::Download(_) => "download",
            Error::Probe(_) => "probe",
            Error::Swap(_) => "swap",
            Error::Persistence(_) => "persistence",
            Error::Io(_) => "io",
            Error::InvalidState(_) => "invalid_state",
            Error::NotFound(_) => "not_found",
            Error::BadRequest(_) => "bad_request",
            Error::Internal(_) => "internal",
        }
    }
}
