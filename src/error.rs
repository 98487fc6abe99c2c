//! Error type for ledger facade operations.

use thiserror::Error;

/// Failure modes of the mutating ledger operations.
///
/// Chain integrity is deliberately not represented here: a tampered chain is
/// a property of existing data, reported as a boolean by `Ledger::is_valid`,
/// not a failed operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Required input fields are missing or empty. Raised before any block
    /// is appended, so a failed call never leaves a partial write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identity or emergency handle did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with current state, e.g. resolving an
    /// already-resolved emergency.
    #[error("conflict: {0}")]
    Conflict(String),
}
