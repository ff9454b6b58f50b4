use lifeproof_store::LedgerError;
use thiserror::Error;

/// Failures that abort a batch. Per-document classification failures are
/// outcomes, not errors.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("document task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
