//! Error taxonomy for OpenVault.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for OpenVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input (empty name, duplicate sibling, bad id).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced id or path does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The password does not match the vault's verification tag.
    #[error("Wrong password")]
    WrongPassword,

    /// Authenticated data failed to verify after the password was accepted.
    #[error("Vault is corrupted: {0}")]
    CorruptedVault(String),

    /// The file exists but is not a vault this build can read.
    #[error("Not a vault: {0}")]
    NotAVault(String),

    /// Target path already exists.
    #[error("Path already exists: {0}")]
    PathConflict(String),

    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key derivation parameters were rejected.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// AEAD tag did not verify.
    #[error("Authentication failed")]
    Authentication,

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No vault session is open.
    #[error("No vault is open")]
    VaultClosed,
}

impl Error {
    /// Stable code for this error, used by callers to branch.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation(_) => ErrorCode::ValidationError,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::WrongPassword => ErrorCode::WrongPassword,
            Error::CorruptedVault(_) | Error::Authentication => ErrorCode::CorruptedVault,
            Error::NotAVault(_) => ErrorCode::NotAVault,
            Error::PathConflict(_) => ErrorCode::PathConflict,
            Error::Io(_) => ErrorCode::IoError,
            Error::KeyDerivation(_) => ErrorCode::KeyDerivationError,
            Error::VaultClosed => ErrorCode::VaultNotOpen,
            Error::Crypto(_) | Error::Serialization(_) => ErrorCode::InternalError,
        }
    }

    /// Shorthand for a corruption error with context.
    pub fn corrupted(context: impl Into<String>) -> Self {
        Error::CorruptedVault(context.into())
    }
}

/// Stable error codes exposed across the command boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    WrongPassword,
    CorruptedVault,
    NotAVault,
    PathConflict,
    IoError,
    KeyDerivationError,
    VaultNotOpen,
    InternalError,
}

impl ErrorCode {
    /// The wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::WrongPassword => "WRONG_PASSWORD",
            ErrorCode::CorruptedVault => "CORRUPTED_VAULT",
            ErrorCode::NotAVault => "NOT_A_VAULT",
            ErrorCode::PathConflict => "PATH_CONFLICT",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::KeyDerivationError => "KEY_DERIVATION_ERROR",
            ErrorCode::VaultNotOpen => "VAULT_NOT_OPEN",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
