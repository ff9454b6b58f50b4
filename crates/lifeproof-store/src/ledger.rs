//! The ingestion ledger: single source of truth for per-document status.
//!
//! Every write is conditional on the record's current status, so two workers
//! racing on the same document cannot both win a transition.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use lifeproof_core::{DocumentRecord, Transition};
use tracing::debug;

use crate::LedgerError;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create a PENDING record.
    ///
    /// Fails with [`LedgerError::AlreadyExists`] while an active record exists.
    /// A terminal record is replaced by a new generation.
    async fn create(&self, document_id: &str) -> Result<DocumentRecord, LedgerError>;

    /// Conditionally apply a lifecycle transition.
    async fn transition(
        &self,
        document_id: &str,
        transition: Transition,
    ) -> Result<DocumentRecord, LedgerError>;

    async fn get(&self, document_id: &str) -> Result<DocumentRecord, LedgerError>;

    /// All records, ordered by document id.
    async fn list(&self) -> Result<Vec<DocumentRecord>, LedgerError>;

    /// Earlier terminal generations of a document, oldest first. The current
    /// record is not included; an unknown id has an empty history.
    async fn history(&self, document_id: &str) -> Result<Vec<DocumentRecord>, LedgerError>;
}

#[derive(Default)]
struct LedgerState {
    current: BTreeMap<String, DocumentRecord>,
    history: BTreeMap<String, Vec<DocumentRecord>>,
}

/// Process-local ledger behind a mutex. Each operation is one critical section.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerState>, LedgerError> {
        self.state
            .lock()
            .map_err(|e| LedgerError::Other(format!("ledger mutex poisoned: {e}")))
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn create(&self, document_id: &str) -> Result<DocumentRecord, LedgerError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let record = match state.current.get(document_id) {
            Some(existing) if existing.is_active() => {
                return Err(LedgerError::AlreadyExists(document_id.to_string()));
            }
            Some(existing) => {
                let previous = existing.clone();
                let next = previous.resubmit(now);
                state
                    .history
                    .entry(document_id.to_string())
                    .or_default()
                    .push(previous);
                next
            }
            None => DocumentRecord::new(document_id, now),
        };
        debug!(document_id, generation = record.generation, "ledger record created");
        state.current.insert(document_id.to_string(), record.clone());
        Ok(record)
    }

    async fn transition(
        &self,
        document_id: &str,
        transition: Transition,
    ) -> Result<DocumentRecord, LedgerError> {
        let mut state = self.lock()?;
        let current = state
            .current
            .get(document_id)
            .ok_or_else(|| LedgerError::NotFound(document_id.to_string()))?;
        let next = current.apply(transition, Utc::now())?;
        debug!(document_id, status = %next.status, "ledger transition");
        state.current.insert(document_id.to_string(), next.clone());
        Ok(next)
    }

    async fn get(&self, document_id: &str) -> Result<DocumentRecord, LedgerError> {
        self.lock()?
            .current
            .get(document_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(document_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>, LedgerError> {
        Ok(self.lock()?.current.values().cloned().collect())
    }

    async fn history(&self, document_id: &str) -> Result<Vec<DocumentRecord>, LedgerError> {
        Ok(self
            .lock()?
            .history
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lifeproof_core::{ClassificationResult, DocumentStatus, ModelTier, RiskLevel};

    fn result(tier: &str) -> ClassificationResult {
        serde_json::from_str(&format!(
            r#"{{"risk_level": "{tier}", "rationale": "test"}}"#
        ))
        .unwrap()
    }

    fn complete(tier: &str) -> Transition {
        Transition::Complete {
            model_tier: ModelTier::Fast,
            model_used: "fast".into(),
            result: result(tier),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let ledger = InMemoryLedger::new();
        let rec = ledger.create("uploads/a.txt").await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Pending);
        assert_eq!(ledger.get("uploads/a.txt").await.unwrap(), rec);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let ledger = InMemoryLedger::new();
        let err = ledger.get("missing").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(!err.is_backend());
    }

    #[tokio::test]
    async fn create_twice_while_active_fails() {
        let ledger = InMemoryLedger::new();
        ledger.create("a").await.unwrap();
        let err = ledger.create("a").await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists(_)));

        ledger.transition("a", Transition::Dispatch).await.unwrap();
        let err = ledger.create("a").await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_after_terminal_starts_new_generation() {
        let ledger = InMemoryLedger::new();
        ledger.create("a").await.unwrap();
        ledger.transition("a", Transition::Dispatch).await.unwrap();
        ledger.transition("a", complete("HIGH")).await.unwrap();

        let again = ledger.create("a").await.unwrap();
        assert_eq!(again.generation, 2);
        assert_eq!(again.status, DocumentStatus::Pending);
        assert!(again.result.is_none());
    }

    #[tokio::test]
    async fn resubmit_keeps_earlier_generations_in_history() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.history("a").await.unwrap().is_empty());

        ledger.create("a").await.unwrap();
        ledger.transition("a", Transition::Dispatch).await.unwrap();
        let first = ledger.transition("a", complete("HIGH")).await.unwrap();
        ledger.create("a").await.unwrap();
        ledger.transition("a", Transition::Dispatch).await.unwrap();
        ledger.transition("a", complete("LOW")).await.unwrap();
        ledger.create("a").await.unwrap();

        let history = ledger.history("a").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], first);
        assert_eq!(history[0].risk_level, Some(RiskLevel::High));
        assert_eq!(history[1].generation, 2);
        assert_eq!(history[1].risk_level, Some(RiskLevel::Low));
        assert_eq!(ledger.get("a").await.unwrap().generation, 3);
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let ledger = InMemoryLedger::new();
        ledger.create("a").await.unwrap();
        ledger.transition("a", Transition::Dispatch).await.unwrap();
        let done = ledger.transition("a", complete("MEDIUM")).await.unwrap();
        assert_eq!(done.status, DocumentStatus::Completed);
        assert_eq!(done.risk_level, Some(RiskLevel::Medium));
        assert!(done.updated_at >= done.created_at);
    }

    #[tokio::test]
    async fn transition_unknown_is_not_found() {
        let ledger = InMemoryLedger::new();
        let err = ledger
            .transition("ghost", Transition::Dispatch)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn skipping_dispatch_is_invalid() {
        let ledger = InMemoryLedger::new();
        ledger.create("a").await.unwrap();
        let err = ledger.transition("a", complete("LOW")).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(
            ledger.get("a").await.unwrap().status,
            DocumentStatus::Pending
        );
    }

    #[tokio::test]
    async fn concurrent_dispatch_has_exactly_one_winner() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.create("race").await.unwrap();

        let a = tokio::spawn({
            let ledger = Arc::clone(&ledger);
            async move { ledger.transition("race", Transition::Dispatch).await }
        });
        let b = tokio::spawn({
            let ledger = Arc::clone(&ledger);
            async move { ledger.transition("race", Transition::Dispatch).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::Conflict { .. })))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn concurrent_completion_has_exactly_one_winner() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.create("race").await.unwrap();
        ledger.transition("race", Transition::Dispatch).await.unwrap();

        let a = tokio::spawn({
            let ledger = Arc::clone(&ledger);
            async move { ledger.transition("race", complete("LOW")).await }
        });
        let b = tokio::spawn({
            let ledger = Arc::clone(&ledger);
            async move {
                ledger
                    .transition(
                        "race",
                        Transition::Fail {
                            model_tier: None,
                            model_used: None,
                            error_detail: "timeout".into(),
                        },
                    )
                    .await
            }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(LedgerError::Conflict { .. })))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn list_is_ordered_by_id() {
        let ledger = InMemoryLedger::new();
        ledger.create("b").await.unwrap();
        ledger.create("a").await.unwrap();
        let ids: Vec<String> = ledger
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.document_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
