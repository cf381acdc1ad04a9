//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Configuration errors are fatal and surface at startup. The admission path
/// itself never returns an error to its callers: internal evaluation
/// failures are recovered into an allow decision (see
/// `AdmissionController::check`).
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
