//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid public URL: {0}")]
    InvalidPublicUrl(String),

    #[error("invalid folder: {0}")]
    InvalidFolder(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
