//! Error types for the Purse core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Token I/O error: {0}")]
    TokenIo(String),

    #[error("Authenticated read failed: {0}")]
    AuthenticatedRead(String),

    #[error("Coprocessor I/O error: {0}")]
    CoprocessorIo(String),

    #[error("Bind secret failed: {0}")]
    BindSecretFailed(String),

    #[error("SHA function failed: {0}")]
    ShaFunctionFailed(String),

    #[error("Invalid account record: {0}")]
    InvalidRecord(String),

    #[error("Negative balance in account record: {0}")]
    NegativeBalance(i32),

    #[error("Balance {0} does not fit in a 24-bit record field")]
    BalanceOutOfRange(u32),

    #[error("Invalid page number: {0}")]
    InvalidPage(u8),

    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    #[error("Service file error: {0}")]
    ServiceFile(String),

    #[error("Hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),
}
