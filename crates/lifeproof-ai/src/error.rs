use thiserror::Error;

use crate::parser::ParseError;

/// Why a document could not be classified. Recorded on the ledger, never
/// thrown past the worker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("document is empty")]
    EmptyDocument,

    #[error("could not fetch document: {0}")]
    Fetch(String),

    /// Will not succeed without a configuration or permission change.
    #[error("model access or configuration error: {0}")]
    NonRetryable(String),

    #[error("model still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ClassifyError {
    /// Short machine-readable kind for logs and archived error files.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyDocument => "EmptyDocument",
            Self::Fetch(_) => "FetchError",
            Self::NonRetryable(_) => "NonRetryableInvocationError",
            Self::RetriesExhausted { .. } => "RetryableInvocationError",
            Self::Parse(_) => "ParseError",
        }
    }

    /// Ledger `error_detail`: kind, message, and raw output for parse failures.
    pub fn detail(&self) -> String {
        match self {
            Self::Parse(e) => format!("{}: {}\nraw output:\n{}", self.kind(), e, e.raw_output),
            _ => format!("{}: {}", self.kind(), self),
        }
    }
}
