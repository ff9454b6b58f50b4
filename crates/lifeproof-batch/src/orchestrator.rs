//! Bounded fan-out of document ids to classifier workers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use lifeproof_ai::ClassifierWorker;
use lifeproof_core::{DocumentRecord, DocumentStatus, ModelTier, PipelineConfig};
use lifeproof_store::{Ledger, LedgerError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::BatchError;
use crate::report::{BatchReport, BatchSummary, DocumentOutcome};

pub struct Orchestrator {
    worker: ClassifierWorker,
    max_concurrency: usize,
    deadline: Option<Duration>,
    force_reprocess: bool,
    tier_override: Option<ModelTier>,
}

impl Orchestrator {
    pub fn new(worker: ClassifierWorker, config: &PipelineConfig) -> Self {
        Self {
            worker,
            max_concurrency: config.max_concurrency.max(1),
            deadline: config.deadline(),
            force_reprocess: false,
            tier_override: None,
        }
    }

    /// Reprocess documents even if they are already COMPLETED.
    pub fn force_reprocess(mut self, force: bool) -> Self {
        self.force_reprocess = force;
        self
    }

    pub fn tier_override(mut self, tier: Option<ModelTier>) -> Self {
        self.tier_override = tier;
        self
    }

    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Classify every distinct id and report one outcome per id.
    ///
    /// When the deadline passes the orchestrator stops waiting. Tasks already
    /// classifying keep running detached and still write their terminal state;
    /// tasks that have not started exit without touching the ledger.
    pub async fn run(&self, document_ids: &[String]) -> Result<BatchReport, BatchError> {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let ids: BTreeSet<&String> = document_ids.iter().collect();
        info!(
            %batch_id,
            documents = ids.len(),
            max_concurrency = self.max_concurrency,
            force_reprocess = self.force_reprocess,
            "batch started"
        );

        // A deadline too far out to represent is no deadline.
        let deadline_at = self.deadline.and_then(|d| Instant::now().checked_add(d));
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        for id in &ids {
            let job = Job {
                worker: self.worker.clone(),
                document_id: (*id).clone(),
                force_reprocess: self.force_reprocess,
                tier_override: self.tier_override,
                deadline_at,
            };
            tasks.spawn(job.run(Arc::clone(&permits)));
        }

        let mut outcomes = BTreeMap::new();
        let mut skipped = BTreeSet::new();
        loop {
            let next = match deadline_at {
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            %batch_id,
                            pending = tasks.len(),
                            "batch deadline reached, detaching remaining tasks"
                        );
                        tasks.detach_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            let Some(joined) = next else { break };
            let settled = match joined {
                Ok(Ok(done)) => done,
                Ok(Err(e)) => {
                    tasks.detach_all();
                    return Err(e.into());
                }
                Err(e) => {
                    tasks.detach_all();
                    return Err(e.into());
                }
            };
            if settled.skipped {
                skipped.insert(settled.document_id.clone());
            }
            outcomes.insert(settled.document_id, settled.outcome);
        }

        for id in ids {
            outcomes
                .entry(id.clone())
                .or_insert(DocumentOutcome::TimedOut);
        }
        let summary = BatchSummary::tally(outcomes.values(), skipped.len());
        info!(
            %batch_id,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.already_completed,
            in_flight = summary.in_flight,
            timed_out = summary.timed_out,
            "batch finished"
        );
        Ok(BatchReport {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            skipped,
            summary,
        })
    }
}

struct Settled {
    document_id: String,
    outcome: DocumentOutcome,
    skipped: bool,
}

/// One document's trip through the pool.
struct Job {
    worker: ClassifierWorker,
    document_id: String,
    force_reprocess: bool,
    tier_override: Option<ModelTier>,
    deadline_at: Option<Instant>,
}

impl Job {
    async fn run(
        self,
        permits: Arc<Semaphore>,
    ) -> Result<Settled, LedgerError> {
        let _permit = permits
            .acquire_owned()
            .await
            .map_err(|e| LedgerError::Other(format!("worker pool closed: {e}")))?;
        let (outcome, skipped) = self.outcome().await?;
        Ok(Settled {
            document_id: self.document_id,
            outcome,
            skipped,
        })
    }

    /// The outcome, and whether it was read back from the ledger rather than
    /// produced by this run.
    async fn outcome(&self) -> Result<(DocumentOutcome, bool), LedgerError> {
        let id = self.document_id.as_str();
        if self.deadline_at.is_some_and(|at| Instant::now() >= at) {
            debug!(document_id = id, "deadline passed before start");
            return Ok((DocumentOutcome::TimedOut, false));
        }

        let ledger = self.worker.ledger();
        match ledger.get(id).await {
            Ok(rec) if rec.status == DocumentStatus::Completed && !self.force_reprocess => {
                debug!(document_id = id, "already completed, skipping");
                return Ok((DocumentOutcome::from_record(&rec), true));
            }
            Ok(rec) if rec.is_active() => return Ok((DocumentOutcome::InFlight, false)),
            Ok(_) | Err(LedgerError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match ledger.create(id).await {
            Ok(_) => {}
            Err(LedgerError::AlreadyExists(_)) => return Ok((DocumentOutcome::InFlight, false)),
            Err(e) => return Err(e),
        }

        let outcome = match self.worker.process(id, self.tier_override).await {
            Ok(rec) => DocumentOutcome::from_record(&rec),
            Err(LedgerError::Conflict { .. }) => DocumentOutcome::InFlight,
            Err(e) => return Err(e),
        };
        Ok((outcome, false))
    }
}

/// Active records last updated more than `older_than` ago.
///
/// These are candidates for a reconciliation pass: a worker may have died
/// between dispatch and completion. Read-only.
pub async fn stale_in_flight(
    ledger: &dyn Ledger,
    older_than: Duration,
) -> Result<Vec<DocumentRecord>, LedgerError> {
    let age = TimeDelta::from_std(older_than).unwrap_or(TimeDelta::MAX);
    let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
        return Ok(Vec::new());
    };
    Ok(ledger
        .list()
        .await?
        .into_iter()
        .filter(|r| r.is_active() && r.updated_at <= cutoff)
        .collect())
}
