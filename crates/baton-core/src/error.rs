//! Error types for `Baton` core library.

use thiserror::Error;

/// Result type alias using `Baton` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `Baton` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
