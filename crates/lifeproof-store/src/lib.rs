//! Storage layer: the ingestion ledger (in-memory, DuckDB) and document sources.

mod error;
pub use error::LedgerError;

mod ledger;
pub use ledger::{InMemoryLedger, Ledger};

pub mod source;
pub use source::{DocumentSource, FsDocumentSource, MemoryDocumentSource, SourceError};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckLedger;
