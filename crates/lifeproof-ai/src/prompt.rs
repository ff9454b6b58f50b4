//! Underwriting prompt: fixed rubric, fixed output schema, document text.

use std::borrow::Cow;

/// Marker spliced between the head and tail of an over-long document.
pub const TRUNCATION_MARKER: &str = "\n\n[...DOCUMENT TRUNCATED...]\n\n";

/// Canonical clinical rubric. Tier boundaries are literal criteria so the
/// same document always meets the same bar.
pub const UNDERWRITING_RUBRIC: &str = "\
<underwriting_rubric>
You are an automated underwriting assistant for a life insurance provider.
Extract clinical risk factors from the medical document and classify the
applicant using this rubric.

HIGH RISK (senior underwriter review):
- Myocardial infarction (MI) or stroke within the last 5 years
- Left ventricular ejection fraction (LVEF) < 45%
- Active malignancy, or cancer treatment within the last 2 years
- End-stage renal disease (ESRD) or dialysis
- Insulin-dependent diabetes with HbA1c > 9.0%
- Severe COPD (FEV1 < 50% predicted)
- Active substance abuse or addiction
- Organ transplant recipient

MEDIUM RISK (standard review with conditions):
- Managed type 2 diabetes (HbA1c 7.0-9.0%)
- Hypertension requiring 2 or more medications
- Current tobacco use, or tobacco use within the last 5 years
- Controlled atrial fibrillation
- Stage 2-3 chronic kidney disease (GFR 30-60)
- Cancer in remission for more than 2 years
- Obesity (BMI > 35)
- Sleep apnea on CPAP therapy

LOW RISK (standard approval):
- No chronic conditions
- Stable conditions managed with a single medication
- Hypertension controlled on monotherapy
- Pre-diabetes (HbA1c < 6.5%)
- Minor surgical history (appendectomy, cholecystectomy)
- Allergies or minor skin conditions

Any single HIGH criterion makes the applicant HIGH. Otherwise any MEDIUM
criterion makes the applicant MEDIUM. Otherwise the applicant is LOW.
If information is missing, write \"Not found in report\". Never invent data.
</underwriting_rubric>";

/// The JSON shape the model must return.
pub const OUTPUT_SCHEMA: &str = r#"{
  "patient_id": "string or null",
  "risk_level": "HIGH | MEDIUM | LOW",
  "risk_factors": ["string"],
  "conditions": [
    {"name": "string", "onset_date": "string or null", "status": "active | managed | resolved"}
  ],
  "medications": [
    {"name": "string", "dosage": "string or null", "compliance": "compliant | non-compliant | unknown"}
  ],
  "procedures": [
    {"procedure": "string", "date": "string or null", "outcome": "string or null"}
  ],
  "lifestyle_flags": {
    "tobacco": "current | former | never | unknown",
    "alcohol": "none | moderate | heavy | unknown",
    "hazardous_activities": ["string"]
  },
  "lab_values": {"HbA1c": "value", "GFR": "value", "LVEF": "value", "LDL": "value"},
  "rationale": "2-3 sentences for the underwriter",
  "confidence": "HIGH | MEDIUM | LOW"
}"#;

/// Cap document text at `max_chars`, keeping the first and last halves.
pub fn fit_document(text: &str, max_chars: usize) -> Cow<'_, str> {
    let total = text.chars().count();
    if total <= max_chars {
        return Cow::Borrowed(text);
    }
    let half = max_chars / 2;
    let head_end = text
        .char_indices()
        .nth(half)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let tail_start = text
        .char_indices()
        .nth(total - half)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    tracing::warn!(total_chars = total, max_chars, "document truncated for prompt");
    Cow::Owned(format!(
        "{}{TRUNCATION_MARKER}{}",
        &text[..head_end],
        &text[tail_start..]
    ))
}

/// Build the full user prompt for one document.
pub fn build_prompt(document_text: &str, max_input_chars: usize) -> String {
    let document = fit_document(document_text, max_input_chars);
    format!(
        "Analyze the following medical document and produce an underwriting summary.\n\
         \n\
         {rubric}\n\
         \n\
         <medical_document>\n\
         {document}\n\
         </medical_document>\n\
         \n\
         Return ONLY a JSON object with exactly this structure, no other text:\n\
         {schema}\n\
         \n\
         Conditions, medications, and procedures must be JSON objects, not strings.\n\
         Cross-reference every finding against the rubric before choosing risk_level.",
        rubric = UNDERWRITING_RUBRIC,
        schema = OUTPUT_SCHEMA,
    )
}
