use lifeproof_core::{DocumentStatus, TransitionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no ledger record for {0}")]
    NotFound(String),

    #[error("{0} already has an active record")]
    AlreadyExists(String),

    /// Lost a race: another writer moved the record first. Do not retry the
    /// same transition.
    #[error("{document_id}: conflict moving to {target}, record is already {actual}")]
    Conflict {
        document_id: String,
        target: DocumentStatus,
        actual: DocumentStatus,
    },

    #[error("{document_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        document_id: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt ledger row for {document_id}: {detail}")]
    Corrupt { document_id: String, detail: String },

    #[error("{0}")]
    Other(String),
}

impl LedgerError {
    /// True for substrate failures (as opposed to contract outcomes such as
    /// `Conflict` or `NotFound`). These mean the ledger cannot make progress.
    pub fn is_backend(&self) -> bool {
        match self {
            Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::Conflict { .. }
            | Self::InvalidTransition { .. } => false,
            _ => true,
        }
    }
}

impl From<TransitionError> for LedgerError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Conflict {
                document_id,
                target,
                actual,
            } => Self::Conflict {
                document_id,
                target,
                actual,
            },
            TransitionError::Invalid {
                document_id,
                from,
                to,
            } => Self::InvalidTransition {
                document_id,
                from,
                to,
            },
        }
    }
}
