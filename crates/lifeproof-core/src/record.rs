//! Document Record: the per-document lifecycle row kept by the ledger.
//!
//! A record moves `PENDING → PROCESSING → {COMPLETED | FAILED}` and never
//! regresses. [`DocumentRecord::apply`] is the single place those rules live;
//! every ledger backend funnels its conditional writes through it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::result::{ClassificationResult, RiskTier};

/// Upper bound on stored diagnostic text (raw model output can be large).
pub const MAX_ERROR_DETAIL_CHARS: usize = 4000;

/// Lifecycle status of a document record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only status a record may hold immediately before entering `self`.
    ///
    /// `PENDING` has no predecessor: records are created in that state.
    pub fn predecessor(&self) -> Option<DocumentStatus> {
        match self {
            Self::Pending => None,
            Self::Processing => Some(Self::Pending),
            Self::Completed | Self::Failed => Some(Self::Processing),
        }
    }

    fn stage(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string did not name a known enum variant.
#[derive(Debug, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for DocumentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownVariant {
                kind: "document status",
                value: other.to_string(),
            }),
        }
    }
}

/// Underwriting risk level recorded on the ledger.
///
/// `Error` is the quarantine level: it is set exactly when the record is FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Error,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RiskTier> for RiskLevel {
    fn from(tier: RiskTier) -> Self {
        match tier {
            RiskTier::Low => Self::Low,
            RiskTier::Medium => Self::Medium,
            RiskTier::High => Self::High,
        }
    }
}

impl FromStr for RiskLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "ERROR" => Ok(Self::Error),
            other => Err(UnknownVariant {
                kind: "risk level",
                value: other.to_string(),
            }),
        }
    }
}

/// Inference backend class chosen per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelTier {
    /// Fast, cheap model for short documents.
    Fast,
    /// Higher-capability model for long or previously escalated documents.
    Escalated,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "FAST",
            Self::Escalated => "ESCALATED",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FAST" => Ok(Self::Fast),
            "ESCALATED" => Ok(Self::Escalated),
            _ => Err(UnknownVariant {
                kind: "model tier",
                value: s.to_string(),
            }),
        }
    }
}

/// A requested lifecycle edge plus the payload that edge writes.
#[derive(Debug, Clone)]
pub enum Transition {
    /// PENDING → PROCESSING. Mints a fresh processing id.
    Dispatch,
    /// PROCESSING → COMPLETED.
    Complete {
        model_tier: ModelTier,
        model_used: String,
        result: ClassificationResult,
    },
    /// PROCESSING → FAILED.
    Fail {
        model_tier: Option<ModelTier>,
        model_used: Option<String>,
        error_detail: String,
    },
}

impl Transition {
    /// Status the record holds after this transition.
    pub fn target(&self) -> DocumentStatus {
        match self {
            Self::Dispatch => DocumentStatus::Processing,
            Self::Complete { .. } => DocumentStatus::Completed,
            Self::Fail { .. } => DocumentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// Another writer already moved the record past the expected status.
    #[error("{document_id}: lost race moving to {target}, record is already {actual}")]
    Conflict {
        document_id: String,
        target: DocumentStatus,
        actual: DocumentStatus,
    },

    /// The edge is not one of the legal lifecycle edges.
    #[error("{document_id}: illegal transition {from} -> {to}")]
    Invalid {
        document_id: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub status: DocumentStatus,
    /// Absent until the record reaches a terminal status.
    pub risk_level: Option<RiskLevel>,
    pub model_tier: Option<ModelTier>,
    pub model_used: Option<String>,
    pub processing_id: Option<Uuid>,
    /// 1 for the first submission, incremented on each resubmission.
    pub generation: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_detail: Option<String>,
    pub result: Option<ClassificationResult>,
}

impl DocumentRecord {
    /// A fresh PENDING record.
    pub fn new(document_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            document_id: document_id.into(),
            status: DocumentStatus::Pending,
            risk_level: None,
            model_tier: None,
            model_used: None,
            processing_id: None,
            generation: 1,
            created_at: now,
            updated_at: now,
            error_detail: None,
            result: None,
        }
    }

    /// Replacement record for a terminal one being submitted again.
    ///
    /// Keeps the previous tier so escalated documents stay escalated.
    pub fn resubmit(&self, now: DateTime<Utc>) -> Self {
        Self {
            model_tier: self.model_tier,
            generation: self.generation + 1,
            ..Self::new(self.document_id.clone(), now)
        }
    }

    /// Non-terminal records are active: a worker may still be touching them.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Check that `target` may be written on top of the current status.
    ///
    /// Ahead of the expected predecessor means a concurrent writer won
    /// ([`TransitionError::Conflict`]); behind it means the edge skips a step
    /// ([`TransitionError::Invalid`]).
    pub fn check(&self, target: DocumentStatus) -> Result<(), TransitionError> {
        let Some(expected) = target.predecessor() else {
            return Err(TransitionError::Invalid {
                document_id: self.document_id.clone(),
                from: self.status,
                to: target,
            });
        };
        if self.status == expected {
            Ok(())
        } else if self.status.stage() > expected.stage() {
            Err(TransitionError::Conflict {
                document_id: self.document_id.clone(),
                target,
                actual: self.status,
            })
        } else {
            Err(TransitionError::Invalid {
                document_id: self.document_id.clone(),
                from: self.status,
                to: target,
            })
        }
    }

    /// Apply a transition, returning the updated record.
    pub fn apply(
        &self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<DocumentRecord, TransitionError> {
        self.check(transition.target())?;

        let mut next = self.clone();
        next.status = transition.target();
        next.updated_at = now;
        match transition {
            Transition::Dispatch => {
                next.processing_id = Some(Uuid::new_v4());
            }
            Transition::Complete {
                model_tier,
                model_used,
                result,
            } => {
                next.risk_level = Some(result.risk_level.into());
                next.model_tier = Some(model_tier);
                next.model_used = Some(model_used);
                next.result = Some(result);
                next.error_detail = None;
            }
            Transition::Fail {
                model_tier,
                model_used,
                error_detail,
            } => {
                next.risk_level = Some(RiskLevel::Error);
                if model_tier.is_some() {
                    next.model_tier = model_tier;
                }
                next.model_used = model_used;
                next.error_detail = Some(truncate_chars(&error_detail, MAX_ERROR_DETAIL_CHARS));
                next.result = None;
            }
        }
        Ok(next)
    }
}

/// Truncate to at most `max` characters, respecting UTF-8 boundaries.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
