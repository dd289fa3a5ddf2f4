//! Error types for the transaction engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Why the last engine operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ReadFailed,
    AuthReadFailed,
    WriteFailed,
    AuthFailed,
    BadAccountData,
    InsufficientFunds,
    BindSecretFailed,
    ShaFunctionFailed,
    CatastrophicFailure,
}

/// Errors that can occur while running a transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Plain read of the account page failed
    #[error("Account read failed: {0}")]
    ReadFailed(String),

    /// Authenticated read of the account page failed
    #[error("Authenticated read failed: {0}")]
    AuthReadFailed(String),

    /// Account write failed or was not confirmed
    #[error("Account write failed: {0}")]
    WriteFailed(String),

    /// Token did not prove possession of its bound secret
    #[error("Token authentication failed")]
    AuthFailed,

    /// Record failed its CRC, signature, or field checks
    #[error("Bad account data: {0}")]
    BadAccountData(String),

    /// Debit exceeds the current balance
    #[error("Insufficient funds: balance {balance}, debit {debit}")]
    InsufficientFunds { balance: u32, debit: u32 },

    /// Coprocessor could not bind a device secret
    #[error("Bind secret failed: {0}")]
    BindSecretFailed(String),

    /// Coprocessor SHA sequence failed
    #[error("SHA function failed: {0}")]
    ShaFunctionFailed(String),

    /// Token state matches neither the old nor the intended record
    #[error("Catastrophic failure after {attempts} reconciliation attempts")]
    CatastrophicFailure { attempts: usize },

    /// Operation called out of order
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    /// Parameter cannot be set or is out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransactionError {
    /// Error kind for this failure, if it is one of the transaction kinds
    pub fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            Self::ReadFailed(_) => ErrorKind::ReadFailed,
            Self::AuthReadFailed(_) => ErrorKind::AuthReadFailed,
            Self::WriteFailed(_) => ErrorKind::WriteFailed,
            Self::AuthFailed => ErrorKind::AuthFailed,
            Self::BadAccountData(_) => ErrorKind::BadAccountData,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::BindSecretFailed(_) => ErrorKind::BindSecretFailed,
            Self::ShaFunctionFailed(_) => ErrorKind::ShaFunctionFailed,
            Self::CatastrophicFailure { .. } => ErrorKind::CatastrophicFailure,
            Self::InvalidState(_) | Self::InvalidParameter(_) | Self::Config(_) => return None,
        })
    }
}

impl From<purse_core::Error> for TransactionError {
    fn from(e: purse_core::Error) -> Self {
        use purse_core::Error as Core;
        match e {
            Core::TokenIo(msg) => Self::ReadFailed(msg),
            Core::AuthenticatedRead(msg) => Self::AuthReadFailed(msg),
            Core::CoprocessorIo(msg) | Core::ShaFunctionFailed(msg) => Self::ShaFunctionFailed(msg),
            Core::BindSecretFailed(msg) => Self::BindSecretFailed(msg),
            Core::InvalidRecord(msg) => Self::BadAccountData(msg),
            Core::NegativeBalance(balance) => {
                Self::BadAccountData(format!("negative balance {}", balance))
            }
            other => Self::BadAccountData(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransactionError {
    fn from(e: std::io::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::de::Error> for TransactionError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for TransactionError {
    fn from(e: toml::ser::Error) -> Self {
        Self::Config(e.to_string())
    }
}
