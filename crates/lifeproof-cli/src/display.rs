//! Terminal rendering for batch reports, ledger records, routing decisions,
//! and gold-standard evaluations.

use std::fmt::Write;

use lifeproof_ai::eval::{EvalReport, Verdict};
use lifeproof_ai::{estimate_tokens, model_for, select_tier};
use lifeproof_batch::{BatchReport, DocumentOutcome};
use lifeproof_core::{ClassificationResult, DocumentRecord, PipelineConfig};

const MAX_LIST_ITEMS: usize = 10;
const MAX_DETAIL_CHARS: usize = 300;

// ── Batch report ──

pub fn render_report(report: &BatchReport) -> String {
    let mut out = String::new();
    let s = &report.summary;
    let elapsed = report.finished_at - report.started_at;
    let _ = writeln!(out, "=== Batch {} ===", report.batch_id);
    let _ = writeln!(
        out,
        "{} documents in {:.1}s",
        s.total,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    let _ = writeln!(out);
    for (id, outcome) in &report.outcomes {
        let detail = match outcome {
            DocumentOutcome::Completed {
                risk_level,
                model_tier,
            } if report.skipped.contains(id) => {
                format!("{risk_level} ({model_tier}) [earlier run]")
            }
            DocumentOutcome::Completed {
                risk_level,
                model_tier,
            } => format!("{risk_level} ({model_tier})"),
            DocumentOutcome::Failed { error_detail } => first_line(error_detail).to_string(),
            _ => String::new(),
        };
        let _ = writeln!(out, "  {:<40} {:<18} {}", id, outcome.label(), detail);
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "completed {}  (HIGH {} / MEDIUM {} / LOW {})",
        s.completed, s.high, s.medium, s.low
    );
    let _ = writeln!(
        out,
        "failed {}  from-earlier-runs {}  in-flight {}  timed-out {}",
        s.failed, s.already_completed, s.in_flight, s.timed_out
    );
    out
}

// ── Ledger records ──

pub fn render_record_table(records: &[DocumentRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<40} {:<11} {:<7} {:<10} {:>3}  updated",
        "document", "status", "risk", "tier", "gen"
    );
    for r in records {
        let _ = writeln!(
            out,
            "{:<40} {:<11} {:<7} {:<10} {:>3}  {}",
            r.document_id,
            r.status.as_str(),
            r.risk_level.map(|l| l.as_str()).unwrap_or("-"),
            r.model_tier.map(|t| t.as_str()).unwrap_or("-"),
            r.generation,
            r.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    out
}

/// A single record as a vertical card.
pub fn render_record_card(record: &DocumentRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ===", record.document_id);
    field(&mut out, "status", &record.status.to_string());
    if let Some(level) = record.risk_level {
        field(&mut out, "risk_level", level.as_str());
    }
    if let Some(tier) = record.model_tier {
        field(&mut out, "model_tier", tier.as_str());
    }
    if let Some(model) = &record.model_used {
        field(&mut out, "model_used", model);
    }
    if let Some(id) = record.processing_id {
        field(&mut out, "processing_id", &id.to_string());
    }
    field(&mut out, "generation", &record.generation.to_string());
    field(&mut out, "created_at", &record.created_at.to_rfc3339());
    field(&mut out, "updated_at", &record.updated_at.to_rfc3339());
    if let Some(detail) = &record.error_detail {
        let shown: String = detail.chars().take(MAX_DETAIL_CHARS).collect();
        field(&mut out, "error_detail", &shown);
    }
    if let Some(result) = &record.result {
        let _ = writeln!(out);
        render_result(&mut out, result);
    }
    out
}

/// Earlier generations, oldest first, one line each.
pub fn render_history(history: &[DocumentRecord]) -> String {
    let mut out = String::new();
    if history.is_empty() {
        return out;
    }
    let _ = writeln!(out, "\nEarlier generations");
    for r in history {
        let outcome = match (&r.risk_level, &r.error_detail) {
            (_, Some(detail)) => first_line(detail).to_string(),
            (Some(level), None) => level.as_str().to_string(),
            (None, None) => "-".to_string(),
        };
        let _ = writeln!(
            out,
            "  gen {:<3} {:<11} {:<10} {}  {}",
            r.generation,
            r.status.as_str(),
            r.model_tier.map(|t| t.as_str()).unwrap_or("-"),
            r.updated_at.format("%Y-%m-%d %H:%M:%S"),
            outcome,
        );
    }
    out
}

// ── Routing ──

/// The tier and model `text` would be routed to.
pub fn render_route(label: &str, text: &str, config: &PipelineConfig) -> String {
    let mut out = String::new();
    let chars = text.chars().count();
    let tier = select_tier(chars, config.token_threshold, None);
    let _ = writeln!(out, "{label}");
    field(&mut out, "chars", &chars.to_string());
    field(&mut out, "est_tokens", &estimate_tokens(chars).to_string());
    field(&mut out, "threshold", &config.token_threshold.to_string());
    field(&mut out, "tier", tier.as_str());
    field(&mut out, "model", model_for(config, tier));
    out
}

// ── Gold-standard evaluation ──

pub fn render_eval(report: &EvalReport) -> String {
    let mut out = String::new();
    for r in &report.results {
        let risk = match (r.expected_risk, r.actual_risk) {
            (Some(expected), Some(actual)) => format!("{expected:?} -> {actual:?}").to_uppercase(),
            (None, Some(actual)) => format!("? -> {actual:?}").to_uppercase(),
            _ => "-".to_string(),
        };
        let note = match (&r.error, &r.judge) {
            (Some(e), _) => first_line(e).to_string(),
            (None, Some(j)) => format!("score {:.1}", j.average_score),
            (None, None) => String::new(),
        };
        let verdict = match r.verdict {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::NeedsReview => "NEEDS_REVIEW",
            Verdict::Error => "ERROR",
        };
        let _ = writeln!(out, "  {:<20} {:<13} {:<18} {}", r.case_id, verdict, risk, note);
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "cases {}  passed {}  failed {}  errors {}",
        report.total_cases, report.passed, report.failed, report.errors
    );
    if let Some(agreement) = report.risk_agreement {
        let _ = writeln!(out, "risk agreement {:.1}%", agreement * 100.0);
    }
    if let Some(score) = report.average_score {
        let _ = writeln!(out, "average score {score:.2}/5.0");
    }
    if !report.critical_failures.is_empty() {
        let _ = writeln!(out, "critical failures: {}", report.critical_failures.join(", "));
    }
    let _ = writeln!(
        out,
        "{}",
        if report.overall_pass { "REGRESSION PASSED" } else { "REGRESSION FAILED" }
    );
    out
}

fn render_result(out: &mut String, result: &ClassificationResult) {
    let _ = writeln!(out, "Summary");
    if let Some(patient) = &result.patient_id {
        field(out, "patient_id", patient);
    }
    if let Some(confidence) = &result.confidence {
        field(out, "confidence", &format!("{confidence:?}").to_uppercase());
    }
    list(out, "risk_factors", result.risk_factors.iter().cloned());
    list(
        out,
        "conditions",
        result.conditions.iter().map(|c| match &c.status {
            Some(status) => format!("{} ({status})", c.name),
            None => c.name.clone(),
        }),
    );
    list(
        out,
        "medications",
        result.medications.iter().map(|m| match &m.dosage {
            Some(dosage) => format!("{} {dosage}", m.name),
            None => m.name.clone(),
        }),
    );
    list(
        out,
        "procedures",
        result.procedures.iter().map(|p| p.procedure.clone()),
    );
    list(
        out,
        "lab_values",
        result.lab_values.iter().map(|(k, v)| format!("{k}={v}")),
    );
    field(out, "rationale", &result.rationale);
}

fn field(out: &mut String, name: &str, value: &str) {
    let _ = writeln!(out, "  {:<16} {}", name, value);
}

fn list(out: &mut String, name: &str, items: impl Iterator<Item = String>) {
    let mut items: Vec<String> = items.collect();
    if items.is_empty() {
        return;
    }
    let extra = items.len().saturating_sub(MAX_LIST_ITEMS);
    items.truncate(MAX_LIST_ITEMS);
    let mut line = items.join(", ");
    if extra > 0 {
        let _ = write!(line, " (+{extra} more)");
    }
    field(out, name, &line);
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}
