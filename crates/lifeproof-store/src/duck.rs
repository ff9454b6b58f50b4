//! DuckDB-backed ledger for runs that must survive process restarts.
//!
//! One row per document in `document_ledger`. Transitions are written with
//! `UPDATE … WHERE document_id = ? AND status = ? AND generation = ?` and the
//! affected-row count decides whether the write won. A terminal row replaced
//! by resubmission is first copied to `document_ledger_history`.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use lifeproof_core::{
    ClassificationResult, DocumentRecord, DocumentStatus, ModelTier, RiskLevel, Transition,
};
use tracing::{debug, info};

use crate::{Ledger, LedgerError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS document_ledger (
    document_id    VARCHAR PRIMARY KEY,
    status         VARCHAR NOT NULL,
    risk_level     VARCHAR,
    model_tier     VARCHAR,
    model_used     VARCHAR,
    processing_id  VARCHAR,
    generation     BIGINT  NOT NULL,
    created_at     VARCHAR NOT NULL,
    updated_at     VARCHAR NOT NULL,
    error_detail   VARCHAR,
    result_json    VARCHAR
);

CREATE TABLE IF NOT EXISTS document_ledger_history (
    document_id    VARCHAR NOT NULL,
    status         VARCHAR NOT NULL,
    risk_level     VARCHAR,
    model_tier     VARCHAR,
    model_used     VARCHAR,
    processing_id  VARCHAR,
    generation     BIGINT  NOT NULL,
    created_at     VARCHAR NOT NULL,
    updated_at     VARCHAR NOT NULL,
    error_detail   VARCHAR,
    result_json    VARCHAR,
    PRIMARY KEY (document_id, generation)
)";

const CURRENT_TABLE: &str = "document_ledger";
const HISTORY_TABLE: &str = "document_ledger_history";

const SELECT_COLUMNS: &str = "document_id, status, risk_level, model_tier, model_used, \
     processing_id, generation, created_at, updated_at, error_detail, result_json";

/// Ledger stored in a DuckDB database.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes,
/// like the rest of the store layer.
pub struct DuckLedger {
    conn: Mutex<Connection>,
}

/// Column values exactly as read from DuckDB, before parsing.
struct RawRow {
    document_id: String,
    status: String,
    risk_level: Option<String>,
    model_tier: Option<String>,
    model_used: Option<String>,
    processing_id: Option<String>,
    generation: i64,
    created_at: String,
    updated_at: String,
    error_detail: Option<String>,
    result_json: Option<String>,
}

impl DuckLedger {
    /// Open an in-memory ledger.
    pub fn open() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent ledger at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, LedgerError> {
        let ledger = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened persistent ledger");
        Ok(ledger)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Other(format!("ledger mutex poisoned: {e}")))
    }

    fn fetch(conn: &Connection, document_id: &str) -> Result<Option<DocumentRecord>, LedgerError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM {CURRENT_TABLE} WHERE document_id = ?");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map([document_id], read_row)?;
        match rows.next() {
            Some(raw) => Ok(Some(parse_row(raw?)?)),
            None => Ok(None),
        }
    }

    fn insert(conn: &Connection, table: &str, rec: &DocumentRecord) -> Result<(), LedgerError> {
        let result_json = rec.result.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            &format!("INSERT INTO {table} VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                rec.document_id,
                rec.status.as_str(),
                rec.risk_level.map(|r| r.as_str()),
                rec.model_tier.map(|t| t.as_str()),
                rec.model_used,
                rec.processing_id.map(|p| p.to_string()),
                i64::from(rec.generation),
                rec.created_at.to_rfc3339(),
                rec.updated_at.to_rfc3339(),
                rec.error_detail,
                result_json,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the row only if it still holds `expected`. Returns rows affected.
    fn update_if(
        conn: &Connection,
        rec: &DocumentRecord,
        expected: &DocumentRecord,
    ) -> Result<usize, LedgerError> {
        let result_json = rec.result.as_ref().map(serde_json::to_string).transpose()?;
        let affected = conn.execute(
            "UPDATE document_ledger SET
                status = ?, risk_level = ?, model_tier = ?, model_used = ?,
                processing_id = ?, generation = ?, created_at = ?, updated_at = ?,
                error_detail = ?, result_json = ?
             WHERE document_id = ? AND status = ? AND generation = ?",
            params![
                rec.status.as_str(),
                rec.risk_level.map(|r| r.as_str()),
                rec.model_tier.map(|t| t.as_str()),
                rec.model_used,
                rec.processing_id.map(|p| p.to_string()),
                i64::from(rec.generation),
                rec.created_at.to_rfc3339(),
                rec.updated_at.to_rfc3339(),
                rec.error_detail,
                result_json,
                expected.document_id,
                expected.status.as_str(),
                i64::from(expected.generation),
            ],
        )?;
        Ok(affected)
    }

    /// Number of rows in the ledger.
    pub fn count(&self) -> Result<usize, LedgerError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT count(*) FROM document_ledger", [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }
}

#[async_trait]
impl Ledger for DuckLedger {
    async fn create(&self, document_id: &str) -> Result<DocumentRecord, LedgerError> {
        let mut conn = self.lock()?;
        let now = Utc::now();
        let existing = Self::fetch(&conn, document_id)?;
        let record = match existing {
            Some(existing) if existing.is_active() => {
                return Err(LedgerError::AlreadyExists(document_id.to_string()));
            }
            Some(existing) => {
                let next = existing.resubmit(now);
                let tx = conn.transaction()?;
                if Self::update_if(&tx, &next, &existing)? == 0 {
                    return Err(LedgerError::AlreadyExists(document_id.to_string()));
                }
                Self::insert(&tx, HISTORY_TABLE, &existing)?;
                tx.commit()?;
                next
            }
            None => {
                let next = DocumentRecord::new(document_id, now);
                Self::insert(&conn, CURRENT_TABLE, &next)?;
                next
            }
        };
        debug!(document_id, generation = record.generation, "ledger record created");
        Ok(record)
    }

    async fn transition(
        &self,
        document_id: &str,
        transition: Transition,
    ) -> Result<DocumentRecord, LedgerError> {
        let conn = self.lock()?;
        let current = Self::fetch(&conn, document_id)?
            .ok_or_else(|| LedgerError::NotFound(document_id.to_string()))?;
        let target = transition.target();
        let next = current.apply(transition, Utc::now())?;

        if Self::update_if(&conn, &next, &current)? == 0 {
            let actual = Self::fetch(&conn, document_id)?
                .map(|r| r.status)
                .unwrap_or(current.status);
            return Err(LedgerError::Conflict {
                document_id: document_id.to_string(),
                target,
                actual,
            });
        }
        debug!(document_id, status = %next.status, "ledger transition");
        Ok(next)
    }

    async fn get(&self, document_id: &str) -> Result<DocumentRecord, LedgerError> {
        let conn = self.lock()?;
        Self::fetch(&conn, document_id)?
            .ok_or_else(|| LedgerError::NotFound(document_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, LedgerError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM {CURRENT_TABLE} ORDER BY document_id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], read_row)?;
        let mut records = Vec::new();
        for raw in rows {
            records.push(parse_row(raw?)?);
        }
        Ok(records)
    }

    async fn history(&self, document_id: &str) -> Result<Vec<DocumentRecord>, LedgerError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {HISTORY_TABLE} WHERE document_id = ? ORDER BY generation"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([document_id], read_row)?;
        let mut records = Vec::new();
        for raw in rows {
            records.push(parse_row(raw?)?);
        }
        Ok(records)
    }
}

fn read_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawRow> {
    Ok(RawRow {
        document_id: row.get(0)?,
        status: row.get(1)?,
        risk_level: row.get(2)?,
        model_tier: row.get(3)?,
        model_used: row.get(4)?,
        processing_id: row.get(5)?,
        generation: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        error_detail: row.get(9)?,
        result_json: row.get(10)?,
    })
}

fn parse_row(raw: RawRow) -> Result<DocumentRecord, LedgerError> {
    let id = raw.document_id.clone();
    let corrupt = |detail: String| LedgerError::Corrupt {
        document_id: id.clone(),
        detail,
    };

    let status: DocumentStatus = raw.status.parse().map_err(|e| corrupt(format!("{e}")))?;
    let risk_level: Option<RiskLevel> = raw
        .risk_level
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| corrupt(format!("{e}")))?;
    let model_tier: Option<ModelTier> = raw
        .model_tier
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| corrupt(format!("{e}")))?;
    let processing_id = raw
        .processing_id
        .map(|s| uuid::Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| corrupt(format!("processing_id: {e}")))?;
    let generation =
        u32::try_from(raw.generation).map_err(|e| corrupt(format!("generation: {e}")))?;
    let created_at = parse_ts(&raw.created_at).map_err(|e| corrupt(format!("created_at: {e}")))?;
    let updated_at = parse_ts(&raw.updated_at).map_err(|e| corrupt(format!("updated_at: {e}")))?;
    let result: Option<ClassificationResult> = raw
        .result_json
        .as_deref()
        .map(|json| serde_json::from_str(json))
        .transpose()?;

    Ok(DocumentRecord {
        document_id: raw.document_id,
        status,
        risk_level,
        model_tier,
        model_used: raw.model_used,
        processing_id,
        generation,
        created_at,
        updated_at,
        error_detail: raw.error_detail,
        result,
    })
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}
