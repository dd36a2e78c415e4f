//! Error types for the application-facing crates.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type outside the Vulkan layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Surface creation errors
    #[error("Surface error: {0}")]
    Surface(String),

    /// Configuration file could not be parsed
    #[error("Config error in '{path}': {message}")]
    Config {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
