//! Batch outcomes and their summary.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lifeproof_core::{DocumentRecord, DocumentStatus, ModelTier, RiskLevel};
use serde::Serialize;
use uuid::Uuid;

/// What happened to one document id in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentOutcome {
    Completed {
        risk_level: RiskLevel,
        model_tier: ModelTier,
    },
    Failed {
        error_detail: String,
    },
    /// Another worker holds the active record.
    InFlight,
    /// The batch deadline passed before this id finished.
    TimedOut,
}

impl DocumentOutcome {
    /// Outcome for a record a worker just drove to a terminal state.
    pub fn from_record(record: &DocumentRecord) -> Self {
        match (record.status, record.risk_level, record.model_tier) {
            (DocumentStatus::Completed, Some(risk_level), Some(model_tier)) => Self::Completed {
                risk_level,
                model_tier,
            },
            (DocumentStatus::Completed, ..) => Self::Failed {
                error_detail: "completed record is missing its risk level or tier".into(),
            },
            _ => Self::Failed {
                error_detail: record.error_detail.clone().unwrap_or_default(),
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "COMPLETED",
            Self::Failed { .. } => "FAILED",
            Self::InFlight => "IN_FLIGHT",
            Self::TimedOut => "TIMED_OUT",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Completed outcomes read back from the ledger without a model call.
    pub already_completed: usize,
    pub in_flight: usize,
    pub timed_out: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl BatchSummary {
    pub fn tally<'a>(
        outcomes: impl IntoIterator<Item = &'a DocumentOutcome>,
        already_completed: usize,
    ) -> Self {
        let mut s = Self {
            already_completed,
            ..Self::default()
        };
        for outcome in outcomes {
            s.total += 1;
            match outcome {
                DocumentOutcome::Completed { risk_level, .. } => {
                    s.completed += 1;
                    match risk_level {
                        RiskLevel::High => s.high += 1,
                        RiskLevel::Medium => s.medium += 1,
                        RiskLevel::Low => s.low += 1,
                        RiskLevel::Error => {}
                    }
                }
                DocumentOutcome::Failed { .. } => s.failed += 1,
                DocumentOutcome::InFlight => s.in_flight += 1,
                DocumentOutcome::TimedOut => s.timed_out += 1,
            }
        }
        s
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: BTreeMap<String, DocumentOutcome>,
    /// Ids whose outcome came from an earlier run.
    pub skipped: BTreeSet<String>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn outcome(&self, document_id: &str) -> Option<&DocumentOutcome> {
        self.outcomes.get(document_id)
    }
}
