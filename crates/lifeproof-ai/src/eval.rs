//! Prompt regression against a gold standard of human-validated cases.
//!
//! Each case is classified with the production prompt and compared with the
//! human summary on risk level. An optional judge model scores the whole
//! summary against the human one; a judge critical failure or a risk-level
//! mismatch fails the case regardless of the judge's average score.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lifeproof_core::RiskTier;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ModelClient, ModelRequest};
use crate::parser::strip_code_fences;
use crate::retry::invoke_with_retry;
use crate::worker::Classifier;

/// Minimum judge average (out of 5) for a passing case.
pub const PASSING_THRESHOLD: f64 = 4.0;

const JUDGE_MAX_TOKENS: u32 = 2_048;

const JUDGE_PROMPT: &str = r#"You are a Senior Underwriting Auditor validating AI-generated medical summaries for a Life Insurance company.

Compare the AI-generated summary against the human-validated gold standard summary and score each category from 1 to 5.

1. FACTUAL ACCURACY (critical): 1 means major facts are wrong or fabricated.
2. RISK ALIGNMENT (critical): 1 means high risk was flagged as low or vice versa.
3. COMPLETENESS: 1 means major categories are missing.
4. CLINICAL RELEVANCE: 1 means critical underwriting concerns are not highlighted.
5. ACTIONABILITY: 1 means the summary is not useful for decision-making.

Scoring rules:
- Any score of 1 in categories 1 or 2 is a critical failure.
- An average below 4.0 needs improvement.
- An average of 4.0 or more passes.

<human_gold_standard>
{human_summary}
</human_gold_standard>

<ai_generated_summary>
{ai_summary}
</ai_generated_summary>

Respond with this JSON object only:
{
  "factual_accuracy": {"score": X, "notes": "..."},
  "risk_alignment": {"score": X, "notes": "..."},
  "completeness": {"score": X, "notes": "..."},
  "clinical_relevance": {"score": X, "notes": "..."},
  "actionability": {"score": X, "notes": "..."},
  "average_score": X.X,
  "critical_failure": true/false,
  "overall_verdict": "PASS" | "FAIL" | "NEEDS_REVIEW",
  "summary_feedback": "Brief overall assessment"
}"#;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("reading gold standard {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("gold standard line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
}

/// One human-validated case. `human_summary` is either a JSON object or a
/// string holding one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldCase {
    #[serde(default = "unknown_case")]
    pub case_id: String,
    #[serde(default)]
    pub input_text: String,
    #[serde(default)]
    pub human_summary: serde_json::Value,
}

fn unknown_case() -> String {
    "unknown".to_string()
}

impl GoldCase {
    fn summary_object(&self) -> serde_json::Value {
        match &self.human_summary {
            serde_json::Value::String(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| self.human_summary.clone())
            }
            other => other.clone(),
        }
    }

    /// Risk level the human assigned, if the summary names a valid one.
    pub fn expected_risk(&self) -> Option<RiskTier> {
        let level = self.summary_object().get("risk_level")?.clone();
        serde_json::from_value(level).ok()
    }

    fn human_summary_text(&self) -> String {
        match &self.human_summary {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        }
    }
}

/// Read a JSONL gold standard. Blank lines are skipped.
pub fn load_gold_standard(path: &Path) -> Result<Vec<GoldCase>, EvalError> {
    let text = std::fs::read_to_string(path).map_err(|source| EvalError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_gold_standard(&text)
}

pub fn parse_gold_standard(text: &str) -> Result<Vec<GoldCase>, EvalError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| EvalError::Json { line: i + 1, source })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
    NeedsReview,
    Error,
}

/// The judge model's assessment of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub average_score: f64,
    #[serde(default)]
    pub critical_failure: bool,
    pub overall_verdict: Verdict,
    #[serde(default)]
    pub summary_feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub case_id: String,
    pub verdict: Verdict,
    pub expected_risk: Option<RiskTier>,
    pub actual_risk: Option<RiskTier>,
    pub model_used: Option<String>,
    pub judge: Option<JudgeVerdict>,
    pub error: Option<String>,
}

impl CaseResult {
    pub fn risk_agrees(&self) -> Option<bool> {
        Some(self.expected_risk? == self.actual_risk?)
    }

    pub fn is_critical(&self) -> bool {
        self.judge.as_ref().is_some_and(|j| j.critical_failure)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    pub total_cases: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub critical_failures: Vec<String>,
    /// Cases whose risk level matched, over cases with both levels known.
    pub risk_agreement: Option<f64>,
    pub average_score: Option<f64>,
    pub overall_pass: bool,
    pub results: Vec<CaseResult>,
}

impl EvalReport {
    fn tally(results: Vec<CaseResult>) -> Self {
        let count = |v: Verdict| results.iter().filter(|r| r.verdict == v).count();
        let passed = count(Verdict::Pass);
        let errors = count(Verdict::Error);
        let failed = results.len() - passed - errors;
        let critical_failures: Vec<String> = results
            .iter()
            .filter(|r| r.is_critical())
            .map(|r| r.case_id.clone())
            .collect();

        let compared: Vec<bool> = results.iter().filter_map(CaseResult::risk_agrees).collect();
        let risk_agreement = (!compared.is_empty())
            .then(|| compared.iter().filter(|a| **a).count() as f64 / compared.len() as f64);
        let scores: Vec<f64> = results
            .iter()
            .filter_map(|r| r.judge.as_ref().map(|j| j.average_score))
            .collect();
        let average_score =
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        Self {
            total_cases: results.len(),
            passed,
            failed,
            errors,
            overall_pass: !results.is_empty()
                && passed == results.len()
                && critical_failures.is_empty(),
            critical_failures,
            risk_agreement,
            average_score,
            results,
        }
    }
}

struct Judge {
    client: Arc<dyn ModelClient>,
    model: String,
}

/// Runs gold cases through a [`Classifier`] and, optionally, a judge model.
pub struct Evaluator {
    classifier: Classifier,
    judge: Option<Judge>,
}

impl Evaluator {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier,
            judge: None,
        }
    }

    pub fn with_judge(mut self, client: Arc<dyn ModelClient>, model: impl Into<String>) -> Self {
        self.judge = Some(Judge {
            client,
            model: model.into(),
        });
        self
    }

    /// Evaluate every case in order. Per-case failures are recorded, not returned.
    pub async fn run(&self, cases: &[GoldCase]) -> EvalReport {
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            let result = self.evaluate(case).await;
            info!(case_id = %result.case_id, verdict = ?result.verdict, "gold case evaluated");
            results.push(result);
        }
        EvalReport::tally(results)
    }

    async fn evaluate(&self, case: &GoldCase) -> CaseResult {
        let mut result = CaseResult {
            case_id: case.case_id.clone(),
            verdict: Verdict::Error,
            expected_risk: case.expected_risk(),
            actual_risk: None,
            model_used: None,
            judge: None,
            error: None,
        };

        let classification = match self.classifier.classify(&case.input_text).await {
            Ok(c) => c,
            Err(e) => {
                warn!(case_id = %case.case_id, error = %e, "classification failed");
                result.error = Some(e.detail());
                return result;
            }
        };
        result.actual_risk = Some(classification.result.risk_level);
        result.model_used = Some(classification.model_used);
        let risk_agrees = result.risk_agrees();

        let Some(judge) = &self.judge else {
            result.verdict = match risk_agrees {
                Some(true) => Verdict::Pass,
                Some(false) => Verdict::Fail,
                None => Verdict::NeedsReview,
            };
            return result;
        };

        let ai_summary = match serde_json::to_string_pretty(&classification.result) {
            Ok(s) => s,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };
        match self.ask_judge(judge, &case.human_summary_text(), &ai_summary).await {
            Ok(verdict) => {
                result.verdict = if verdict.critical_failure || risk_agrees == Some(false) {
                    Verdict::Fail
                } else if verdict.overall_verdict == Verdict::Pass
                    && verdict.average_score < PASSING_THRESHOLD
                {
                    Verdict::NeedsReview
                } else {
                    verdict.overall_verdict
                };
                result.judge = Some(verdict);
            }
            Err(e) => {
                warn!(case_id = %case.case_id, error = %e, "judge failed");
                result.error = Some(e);
            }
        }
        result
    }

    async fn ask_judge(
        &self,
        judge: &Judge,
        human_summary: &str,
        ai_summary: &str,
    ) -> Result<JudgeVerdict, String> {
        let request = ModelRequest {
            model: judge.model.clone(),
            prompt: JUDGE_PROMPT
                .replace("{human_summary}", human_summary)
                .replace("{ai_summary}", ai_summary),
            max_tokens: JUDGE_MAX_TOKENS,
            temperature: 0.0,
        };
        let config = self.classifier.config();
        let raw = invoke_with_retry(judge.client.as_ref(), &request, &config.retry)
            .await
            .map_err(|e| e.detail())?;
        serde_json::from_str(strip_code_fences(&raw))
            .map_err(|e| format!("judge output did not parse: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use lifeproof_core::{PipelineConfig, RetryPolicy};

    use crate::client::InvocationError;

    type Reply = fn(&ModelRequest) -> Result<String, InvocationError>;

    struct StubModel {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelClient for StubModel {
        async fn invoke(&self, request: &ModelRequest) -> Result<String, InvocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.reply)(request)
        }
    }

    /// HIGH for cardiac markers, LOW otherwise.
    fn classify(request: &ModelRequest) -> Result<String, InvocationError> {
        if request.prompt.contains("ACCESS DENIED") {
            return Err(InvocationError::NonRetryable("no model access".into()));
        }
        let level = if request.prompt.contains("LVEF 42%") { "HIGH" } else { "LOW" };
        Ok(format!(r#"{{"risk_level": "{level}", "rationale": "stub"}}"#))
    }

    fn judge_pass(_: &ModelRequest) -> Result<String, InvocationError> {
        Ok("```json\n{\"average_score\": 4.6, \"critical_failure\": false, \
            \"overall_verdict\": \"PASS\", \"summary_feedback\": \"Accurate.\"}\n```"
            .into())
    }

    fn judge_critical(_: &ModelRequest) -> Result<String, InvocationError> {
        Ok(r#"{"average_score": 2.2, "critical_failure": true, "overall_verdict": "FAIL"}"#.into())
    }

    fn judge_garbage(_: &ModelRequest) -> Result<String, InvocationError> {
        Ok("I think it looks fine.".into())
    }

    fn classifier(client: Arc<StubModel>) -> Classifier {
        let config = PipelineConfig {
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            ..PipelineConfig::default()
        };
        Classifier::new(Arc::new(config), client)
    }

    fn case(id: &str, text: &str, summary: serde_json::Value) -> GoldCase {
        GoldCase {
            case_id: id.into(),
            input_text: text.into(),
            human_summary: summary,
        }
    }

    fn gold() -> Vec<GoldCase> {
        vec![
            case(
                "GOLD-001",
                "History of STEMI in 2022. Current LVEF 42%.",
                serde_json::json!({"risk_level": "HIGH"}),
            ),
            case(
                "GOLD-002",
                "Annual physical, no findings.",
                serde_json::Value::String(r#"{"risk_level": "LOW"}"#.into()),
            ),
        ]
    }

    #[test]
    fn gold_standard_lines_parse_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"case_id": "GOLD-001", "input_text": "x", "human_summary": "{{\"risk_level\": \"MEDIUM\"}}"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"input_text": "y", "human_summary": {{"risk_level": "HIGH"}}}}"#)
            .unwrap();

        let cases = load_gold_standard(file.path()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].expected_risk(), Some(RiskTier::Medium));
        assert_eq!(cases[1].case_id, "unknown");
        assert_eq!(cases[1].expected_risk(), Some(RiskTier::High));
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = parse_gold_standard("{\"case_id\": \"a\"}\n\nnot json\n").unwrap_err();
        assert!(matches!(err, EvalError::Json { line: 3, .. }));
    }

    #[tokio::test]
    async fn risk_agreement_without_judge() {
        let mut cases = gold();
        cases.push(case(
            "GOLD-003",
            "Annual physical, no findings.",
            serde_json::json!({"risk_level": "MEDIUM"}),
        ));
        cases.push(case("GOLD-004", "Annual physical.", serde_json::json!("free text")));

        let report = Evaluator::new(classifier(StubModel::new(classify)))
            .run(&cases)
            .await;
        assert_eq!(report.total_cases, 4);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(report.risk_agreement, Some(2.0 / 3.0));
        assert_eq!(report.results[2].verdict, Verdict::Fail);
        assert_eq!(report.results[3].verdict, Verdict::NeedsReview);
        assert!(report.average_score.is_none());
        assert!(!report.overall_pass);
    }

    #[tokio::test]
    async fn passing_judge_passes_the_run() {
        let judge = StubModel::new(judge_pass);
        let report = Evaluator::new(classifier(StubModel::new(classify)))
            .with_judge(judge.clone(), "judge-model")
            .run(&gold())
            .await;
        assert_eq!(judge.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.passed, 2);
        assert_eq!(report.average_score, Some(4.6));
        assert_eq!(report.risk_agreement, Some(1.0));
        assert!(report.overall_pass);
    }

    #[tokio::test]
    async fn judge_critical_failure_fails_the_case() {
        let report = Evaluator::new(classifier(StubModel::new(classify)))
            .with_judge(StubModel::new(judge_critical), "judge-model")
            .run(&gold()[..1])
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.critical_failures, vec!["GOLD-001".to_string()]);
        assert!(!report.overall_pass);
    }

    #[tokio::test]
    async fn classifier_and_judge_errors_are_counted_not_raised() {
        let mut cases = gold();
        cases[1].input_text = "ACCESS DENIED".into();
        let report = Evaluator::new(classifier(StubModel::new(classify)))
            .with_judge(StubModel::new(judge_garbage), "judge-model")
            .run(&cases)
            .await;
        assert_eq!(report.errors, 2);
        assert!(report.results[0].error.as_deref().unwrap().contains("did not parse"));
        assert_eq!(report.results[0].actual_risk, Some(RiskTier::High));
        assert!(report.results[1].actual_risk.is_none());
        assert!(!report.overall_pass);
    }
}
