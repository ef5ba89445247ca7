//! Failures of the token ledger.
//!
//! Every variant ends up as the same `{ "error": ... }` response at the HTTP
//! boundary; the split exists so logs say which step went wrong.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Body missing, not JSON, or with fields of the wrong type
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("failed to update token balance: {0}")]
    BalanceUpdate(#[source] rusqlite::Error),

    /// The balance may already have moved when this is returned in two-step mode
    #[error("failed to record token transaction: {0}")]
    TransactionInsert(#[source] rusqlite::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
