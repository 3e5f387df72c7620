//! Error types for the ledger engine.

use thiserror::Error;

/// Errors raised by the ledger core and its collaborators.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Transient upstream failure (chain RPC unavailable, rate-limited).
    /// Safe to retry at the ingestion boundary; nothing is committed until a
    /// full block range succeeds.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Persistence failure. Unrecoverable from the core's point of view.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The event log and the derived state disagree: reconstruction paths
    /// diverged, a de-scale division left a remainder, or checked arithmetic
    /// overflowed. Surfaced to callers, never silently reconciled.
    #[error("Data integrity violation: {reason}")]
    Integrity { reason: String },

    /// Rejected at the boundary before touching the core.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// Build an [`LedgerError::Integrity`] from anything displayable.
    pub fn integrity(reason: impl Into<String>) -> Self {
        Self::Integrity {
            reason: reason.into(),
        }
    }

    /// Returns `true` for data-integrity violations.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Returns `true` for transient upstream failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}
