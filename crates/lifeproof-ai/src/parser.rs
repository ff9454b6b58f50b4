//! Validated parsing of model output into a [`ClassificationResult`].
//!
//! Fails closed: anything that is not exactly the expected shape is a
//! [`ParseError`] carrying the raw output, never a best-effort guess.

use lifeproof_core::ClassificationResult;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("model output did not match the result schema: {message}")]
pub struct ParseError {
    pub message: String,
    pub raw_output: String,
}

/// Remove a surrounding markdown code fence (```json … ``` or ``` … ```).
pub fn strip_code_fences(raw: &str) -> &str {
    let text = raw.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```JSON"))
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

pub fn parse_classification(raw: &str) -> Result<ClassificationResult, ParseError> {
    let fail = |message: String| ParseError {
        message,
        raw_output: raw.to_string(),
    };

    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(fail("empty response".into()));
    }

    let result: ClassificationResult =
        serde_json::from_str(body).map_err(|e| fail(e.to_string()))?;

    let problems = result.problems();
    if !problems.is_empty() {
        return Err(fail(problems.join("; ")));
    }
    Ok(result)
}
