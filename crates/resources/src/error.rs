//! Error types for resource loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The file exists but could not be decoded.
    #[error("Failed to decode image '{path}': {source}")]
    Decode {
        /// Path to the file that failed to decode.
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A decoding worker panicked.
    #[error("Image decoding worker panicked")]
    WorkerPanicked,

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
