//! Core error type.
//!
//! Higher crates define their own error enums and wrap `CoreError` as one
//! variant via `#[from]`.

use thiserror::Error;

/// Errors raised by `fm-core` helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("index {0} does not fit in a 32-bit agent index")]
    IndexOverflow(usize),
}

/// Shorthand result type for `fm-core`.
pub type CoreResult<T> = Result<T, CoreError>;
