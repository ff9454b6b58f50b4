//! The classifier worker: fetch, route, invoke, parse, record.

use std::sync::Arc;

use lifeproof_core::{ClassificationResult, DocumentRecord, ModelTier, PipelineConfig, Transition};
use lifeproof_store::{DocumentSource, Ledger, LedgerError};
use tracing::{info, warn};

use crate::client::{ModelClient, ModelRequest};
use crate::error::ClassifyError;
use crate::parser::parse_classification;
use crate::prompt::build_prompt;
use crate::retry::invoke_with_retry;
use crate::routing::{model_for, select_tier};

/// A successful classification and the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: ModelTier,
    pub model_used: String,
    pub result: ClassificationResult,
}

/// Stateless text-to-result classification. Knows nothing about the ledger.
#[derive(Clone)]
pub struct Classifier {
    config: Arc<PipelineConfig>,
    client: Arc<dyn ModelClient>,
}

impl Classifier {
    pub fn new(config: Arc<PipelineConfig>, client: Arc<dyn ModelClient>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn route(&self, text: &str, override_tier: Option<ModelTier>) -> ModelTier {
        select_tier(
            text.chars().count(),
            self.config.token_threshold,
            override_tier,
        )
    }

    /// Classify with the tier chosen by document size.
    pub async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        self.classify_on(text, self.route(text, None)).await
    }

    /// Classify on an explicit tier.
    pub async fn classify_on(
        &self,
        text: &str,
        tier: ModelTier,
    ) -> Result<Classification, ClassifyError> {
        if text.trim().is_empty() {
            return Err(ClassifyError::EmptyDocument);
        }
        let request = ModelRequest {
            model: model_for(&self.config, tier).to_string(),
            prompt: build_prompt(text, self.config.max_input_chars),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let raw = invoke_with_retry(self.client.as_ref(), &request, &self.config.retry).await?;
        let result = parse_classification(&raw)?;
        Ok(Classification {
            tier,
            model_used: request.model,
            result,
        })
    }
}

/// Drives one document through PROCESSING to a terminal ledger state.
#[derive(Clone)]
pub struct ClassifierWorker {
    classifier: Classifier,
    source: Arc<dyn DocumentSource>,
    ledger: Arc<dyn Ledger>,
}

impl ClassifierWorker {
    pub fn new(
        classifier: Classifier,
        source: Arc<dyn DocumentSource>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            classifier,
            source,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Process a PENDING document.
    ///
    /// Classification failures end as a FAILED record, not an `Err`. An `Err`
    /// means the ledger itself refused: another worker won the dispatch, or
    /// the backend failed.
    pub async fn process(
        &self,
        document_id: &str,
        tier_override: Option<ModelTier>,
    ) -> Result<DocumentRecord, LedgerError> {
        let record = self
            .ledger
            .transition(document_id, Transition::Dispatch)
            .await?;
        let processing_id = record.processing_id;

        let text = match self.source.fetch(document_id).await {
            Ok(text) => text,
            Err(e) => {
                let err = ClassifyError::Fetch(e.to_string());
                return self.fail(document_id, None, None, &err).await;
            }
        };

        // A document escalated in an earlier generation stays escalated.
        let carried = record.model_tier.filter(|t| *t == ModelTier::Escalated);
        let tier = self
            .classifier
            .route(&text, tier_override.or(carried));
        let model = model_for(self.classifier.config(), tier).to_string();
        info!(
            document_id,
            ?processing_id,
            chars = text.chars().count(),
            tier = %tier,
            model = %model,
            "classifying document"
        );

        match self.classifier.classify_on(&text, tier).await {
            Ok(c) => {
                let done = self
                    .ledger
                    .transition(
                        document_id,
                        Transition::Complete {
                            model_tier: c.tier,
                            model_used: c.model_used,
                            result: c.result,
                        },
                    )
                    .await?;
                info!(document_id, risk_level = ?done.risk_level, "document completed");
                Ok(done)
            }
            Err(err) => self.fail(document_id, Some(tier), Some(model), &err).await,
        }
    }

    async fn fail(
        &self,
        document_id: &str,
        model_tier: Option<ModelTier>,
        model_used: Option<String>,
        err: &ClassifyError,
    ) -> Result<DocumentRecord, LedgerError> {
        warn!(document_id, kind = err.kind(), error = %err, "document failed");
        self.ledger
            .transition(
                document_id,
                Transition::Fail {
                    model_tier,
                    model_used,
                    error_detail: err.detail(),
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use lifeproof_core::{DocumentStatus, RetryPolicy, RiskLevel, RiskTier};
    use lifeproof_store::{InMemoryLedger, MemoryDocumentSource};

    use crate::client::InvocationError;

    const LOW: &str = r#"{"risk_level": "LOW", "rationale": "No chronic conditions."}"#;

    /// Fails `failures` times with the given error, then returns `reply`.
    struct FailThenSucceed {
        failures: usize,
        error: InvocationError,
        reply: String,
        calls: AtomicUsize,
        models: Mutex<Vec<String>>,
    }

    impl FailThenSucceed {
        fn new(failures: usize, error: InvocationError, reply: &str) -> Self {
            Self {
                failures,
                error,
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                models: Mutex::new(Vec::new()),
            }
        }

        fn ok(reply: &str) -> Self {
            Self::new(0, InvocationError::Retryable(String::new()), reply)
        }
    }

    #[async_trait]
    impl ModelClient for FailThenSucceed {
        async fn invoke(&self, request: &ModelRequest) -> Result<String, InvocationError> {
            self.models.lock().unwrap().push(request.model.clone());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(self.reply.clone())
            }
        }
    }

    fn config() -> Arc<PipelineConfig> {
        Arc::new(PipelineConfig {
            token_threshold: 100,
            retry: RetryPolicy {
                max_attempts: 5,
                initial_backoff_ms: 1,
                backoff_rate: 2.0,
                max_backoff_ms: 4,
            },
            ..PipelineConfig::default()
        })
    }

    async fn worker_with(
        client: Arc<FailThenSucceed>,
        source: MemoryDocumentSource,
    ) -> (ClassifierWorker, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let classifier = Classifier::new(config(), client);
        let worker = ClassifierWorker::new(classifier, Arc::new(source), ledger.clone());
        (worker, ledger)
    }

    #[tokio::test]
    async fn classifier_routes_by_size() {
        let client = Arc::new(FailThenSucceed::ok(LOW));
        let classifier = Classifier::new(config(), client.clone());
        classifier.classify("short note").await.unwrap();
        let long = "x".repeat(400);
        let c = classifier.classify(&long).await.unwrap();
        assert_eq!(c.tier, ModelTier::Escalated);
        assert_eq!(
            *client.models.lock().unwrap(),
            vec![
                PipelineConfig::default().fast_model,
                PipelineConfig::default().escalated_model
            ]
        );
    }

    #[tokio::test]
    async fn process_completes_document() {
        let client = Arc::new(FailThenSucceed::ok(LOW));
        let source = MemoryDocumentSource::new().with("a.txt", "BP 120/80. No medications.");
        let (worker, ledger) = worker_with(client, source).await;
        ledger.create("a.txt").await.unwrap();

        let rec = worker.process("a.txt", None).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Completed);
        assert_eq!(rec.risk_level, Some(RiskLevel::Low));
        assert_eq!(rec.model_tier, Some(ModelTier::Fast));
        assert!(rec.processing_id.is_some());
        assert_eq!(rec.result.unwrap().risk_level, RiskTier::Low);
    }

    #[tokio::test]
    async fn throttled_run_matches_first_attempt_success() {
        let source = || MemoryDocumentSource::new().with("a.txt", "Stable on lisinopril.");

        let clean = Arc::new(FailThenSucceed::ok(LOW));
        let (worker, ledger) = worker_with(clean, source()).await;
        ledger.create("a.txt").await.unwrap();
        let expected = worker.process("a.txt", None).await.unwrap();

        let throttled = Arc::new(FailThenSucceed::new(
            2,
            InvocationError::Retryable("ThrottlingException".into()),
            LOW,
        ));
        let (worker, ledger) = worker_with(throttled.clone(), source()).await;
        ledger.create("a.txt").await.unwrap();
        let got = worker.process("a.txt", None).await.unwrap();

        assert_eq!(throttled.calls.load(Ordering::SeqCst), 3);
        assert_eq!(got.status, expected.status);
        assert_eq!(got.risk_level, expected.risk_level);
        assert_eq!(got.model_tier, expected.model_tier);
        assert_eq!(got.model_used, expected.model_used);
        assert_eq!(got.result, expected.result);
        assert_eq!(got.error_detail, None);
    }

    #[tokio::test]
    async fn access_denied_fails_without_retry() {
        let client = Arc::new(FailThenSucceed::new(
            usize::MAX,
            InvocationError::NonRetryable("AccessDeniedException".into()),
            LOW,
        ));
        let source = MemoryDocumentSource::new().with("a.txt", "text");
        let (worker, ledger) = worker_with(client.clone(), source).await;
        ledger.create("a.txt").await.unwrap();

        let rec = worker.process("a.txt", None).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Failed);
        assert_eq!(rec.risk_level, Some(RiskLevel::Error));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        let detail = rec.error_detail.unwrap();
        assert!(detail.starts_with("NonRetryableInvocationError"), "{detail}");
    }

    #[tokio::test]
    async fn exhausted_retries_are_distinguishable_from_access_errors() {
        let client = Arc::new(FailThenSucceed::new(
            usize::MAX,
            InvocationError::Retryable("ThrottlingException".into()),
            LOW,
        ));
        let source = MemoryDocumentSource::new().with("a.txt", "text");
        let (worker, ledger) = worker_with(client.clone(), source).await;
        ledger.create("a.txt").await.unwrap();

        let rec = worker.process("a.txt", None).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 5);
        assert!(
            rec.error_detail
                .unwrap()
                .starts_with("RetryableInvocationError")
        );
    }

    #[tokio::test]
    async fn string_list_output_fails_with_raw_output_recorded() {
        let raw = r#"{"risk_level": "MEDIUM", "conditions": ["Type 2 Diabetes"], "rationale": "x"}"#;
        let client = Arc::new(FailThenSucceed::ok(raw));
        let source = MemoryDocumentSource::new().with("a.txt", "HbA1c 7.4%");
        let (worker, ledger) = worker_with(client, source).await;
        ledger.create("a.txt").await.unwrap();

        let rec = worker.process("a.txt", None).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Failed);
        assert_eq!(rec.risk_level, Some(RiskLevel::Error));
        assert!(rec.result.is_none());
        assert_eq!(rec.model_tier, Some(ModelTier::Fast));
        let detail = rec.error_detail.unwrap();
        assert!(detail.starts_with("ParseError"));
        assert!(detail.contains(raw));
    }

    #[tokio::test]
    async fn empty_document_fails_without_model_call() {
        let client = Arc::new(FailThenSucceed::ok(LOW));
        let source = MemoryDocumentSource::new().with("blank.txt", "  \n ");
        let (worker, ledger) = worker_with(client.clone(), source).await;
        ledger.create("blank.txt").await.unwrap();

        let rec = worker.process("blank.txt", None).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Failed);
        assert!(rec.error_detail.unwrap().starts_with("EmptyDocument"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_document_fails_with_no_tier() {
        let client = Arc::new(FailThenSucceed::ok(LOW));
        let (worker, ledger) = worker_with(client, MemoryDocumentSource::new()).await;
        ledger.create("gone.txt").await.unwrap();

        let rec = worker.process("gone.txt", None).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Failed);
        assert_eq!(rec.model_tier, None);
        assert!(rec.error_detail.unwrap().starts_with("FetchError"));
    }

    #[tokio::test]
    async fn override_forces_escalated_tier() {
        let client = Arc::new(FailThenSucceed::ok(LOW));
        let source = MemoryDocumentSource::new().with("a.txt", "short");
        let (worker, ledger) = worker_with(client, source).await;
        ledger.create("a.txt").await.unwrap();

        let rec = worker
            .process("a.txt", Some(ModelTier::Escalated))
            .await
            .unwrap();
        assert_eq!(rec.model_tier, Some(ModelTier::Escalated));
        assert_eq!(rec.model_used, Some(config().escalated_model.clone()));
    }

    #[tokio::test]
    async fn escalation_carries_over_to_resubmission() {
        let client = Arc::new(FailThenSucceed::ok(LOW));
        let source = MemoryDocumentSource::new().with("a.txt", "short");
        let (worker, ledger) = worker_with(client, source).await;
        ledger.create("a.txt").await.unwrap();
        worker
            .process("a.txt", Some(ModelTier::Escalated))
            .await
            .unwrap();

        ledger.create("a.txt").await.unwrap();
        let again = worker.process("a.txt", None).await.unwrap();
        assert_eq!(again.generation, 2);
        assert_eq!(again.model_tier, Some(ModelTier::Escalated));
    }

    #[tokio::test]
    async fn second_dispatch_is_refused() {
        let client = Arc::new(FailThenSucceed::ok(LOW));
        let source = MemoryDocumentSource::new().with("a.txt", "short");
        let (worker, ledger) = worker_with(client, source).await;
        ledger.create("a.txt").await.unwrap();
        worker.process("a.txt", None).await.unwrap();

        let err = worker.process("a.txt", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
    }
}
