//! Error types for the seed vault
//!
//! PIN-path failures (lockout, wrong PIN, derivation failure) are recovered
//! into attempt outcomes by the unlock workflow. Wallet and state errors
//! indicate integration defects and are propagated.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Seed vault errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Attempt rejected by the retry lockout, no retry consumed
    #[error("Locked out: {0}")]
    LockedOut(String),

    /// Derived key did not decrypt the seed
    #[error("Wrong password")]
    WrongPassword,

    /// Key derivation could not complete
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    /// Work arrived after the owning session was torn down
    #[error("Session ended")]
    SessionEnded,

    /// Malformed ciphertext or cipher misuse
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Wallet integration error (missing key chain, inconsistent flags)
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Retry state persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::LockedOut(_) | Error::WrongPassword | Error::DerivationFailed(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::LockedOut(remaining) => {
                format!("Too many wrong PINs. Try again later ({}).", remaining)
            }
            Error::WrongPassword => "The PIN is not correct.".to_string(),
            Error::DerivationFailed(_) => {
                "Unable to check the PIN right now. Please try again.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::LockedOut(_) | Error::WrongPassword => ErrorCategory::Authentication,
            Error::DerivationFailed(_) | Error::Encryption(_) => ErrorCategory::Crypto,
            Error::SessionEnded | Error::InvalidState(_) => ErrorCategory::Session,
            Error::Wallet(_) => ErrorCategory::Wallet,
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => ErrorCategory::Storage,
            Error::Config(_) => ErrorCategory::Config,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// PIN checks and lockout
    Authentication,
    /// Key derivation and ciphers
    Crypto,
    /// Session lifecycle
    Session,
    /// Wallet collaborator
    Wallet,
    /// Persistence
    Storage,
    /// Settings
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Authentication => write!(f, "Authentication"),
            ErrorCategory::Crypto => write!(f, "Crypto"),
            ErrorCategory::Session => write!(f, "Session"),
            ErrorCategory::Wallet => write!(f, "Wallet"),
            ErrorCategory::Storage => write!(f, "Storage"),
            ErrorCategory::Config => write!(f, "Config"),
        }
    }
}
