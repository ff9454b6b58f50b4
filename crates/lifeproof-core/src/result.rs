//! Classification Result: the structured underwriting extraction for one document.
//!
//! Conditions, medications, and procedures are records, never bare strings.
//! A model response that lists `"conditions": ["Hypertension"]` does not
//! deserialize, which is how malformed output fails closed.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Risk tier a model may assign. Unlike `RiskLevel` it has no `ERROR` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    #[serde(default)]
    pub onset_date: Option<String>,
    /// active / managed / resolved
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    /// compliant / non-compliant / unknown
    #[serde(default)]
    pub compliance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    #[serde(alias = "name")]
    pub procedure: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifestyleFlags {
    #[serde(default)]
    pub tobacco: Option<String>,
    #[serde(default)]
    pub alcohol: Option<String>,
    #[serde(default)]
    pub hazardous_activities: Vec<String>,
}

/// A lab reading: numeric when the model reports a bare number, text otherwise
/// (`"7.8%"`, `"Not found in report"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for LabValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default)]
    pub patient_id: Option<String>,
    pub risk_level: RiskTier,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default, alias = "surgeries")]
    pub procedures: Vec<Procedure>,
    #[serde(default, alias = "lifestyle")]
    pub lifestyle_flags: LifestyleFlags,
    #[serde(default)]
    pub lab_values: BTreeMap<String, LabValue>,
    #[serde(alias = "underwriter_notes")]
    pub rationale: String,
    #[serde(default)]
    pub confidence: Option<Confidence>,
}

impl ClassificationResult {
    /// Content problems that survive deserialization (blank names, empty rationale).
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.rationale.trim().is_empty() {
            problems.push("rationale is empty".to_string());
        }
        for (i, c) in self.conditions.iter().enumerate() {
            if c.name.trim().is_empty() {
                problems.push(format!("conditions[{i}].name is empty"));
            }
        }
        for (i, m) in self.medications.iter().enumerate() {
            if m.name.trim().is_empty() {
                problems.push(format!("medications[{i}].name is empty"));
            }
        }
        for (i, p) in self.procedures.iter().enumerate() {
            if p.procedure.trim().is_empty() {
                problems.push(format!("procedures[{i}].procedure is empty"));
            }
        }
        if self.lab_values.keys().any(|k| k.trim().is_empty()) {
            problems.push("lab_values has an empty key".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "patient_id": "APS-1042",
        "processing_id": "ignored-extra-field",
        "risk_level": "MEDIUM",
        "risk_factors": ["Type 2 diabetes", "Hypertension on two agents"],
        "conditions": [
            {"name": "Type 2 Diabetes", "onset_date": "2016", "status": "managed"},
            {"name": "Hypertension", "onset_date": "2019", "status": "managed"}
        ],
        "medications": [
            {"name": "Metformin", "dosage": "1000mg BID", "compliance": "compliant"}
        ],
        "surgeries": [
            {"procedure": "Appendectomy", "date": "2005", "outcome": "uncomplicated"}
        ],
        "lifestyle_flags": {"tobacco": "never", "alcohol": "moderate", "hazardous_activities": []},
        "lab_values": {"HbA1c": "7.8%", "GFR": 78},
        "underwriter_notes": "Two managed chronic conditions.",
        "confidence": "HIGH"
    }"#;

    #[test]
    fn parses_full_model_shape_with_aliases() {
        let r: ClassificationResult = serde_json::from_str(FULL).unwrap();
        assert_eq!(r.risk_level, RiskTier::Medium);
        assert_eq!(r.conditions.len(), 2);
        assert_eq!(r.conditions[0].status.as_deref(), Some("managed"));
        assert_eq!(r.procedures[0].procedure, "Appendectomy");
        assert_eq!(r.lab_values["GFR"], LabValue::Number(78.0));
        assert_eq!(r.lab_values["HbA1c"].to_string(), "7.8%");
        assert_eq!(r.rationale, "Two managed chronic conditions.");
        assert!(r.problems().is_empty());
    }

    #[test]
    fn structured_entries_survive_serialization() {
        let r: ClassificationResult = serde_json::from_str(FULL).unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert!(json["conditions"][0].is_object());
        assert_eq!(json["medications"][0]["dosage"], "1000mg BID");
        assert!(json["procedures"][0].is_object());
        let back: ClassificationResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn string_list_where_records_expected_is_rejected() {
        let json = r#"{
            "risk_level": "LOW",
            "conditions": ["Hypertension", "Asthma"],
            "rationale": "x"
        }"#;
        assert!(serde_json::from_str::<ClassificationResult>(json).is_err());
    }

    #[test]
    fn error_tier_is_not_a_model_answer() {
        let json = r#"{"risk_level": "ERROR", "rationale": "x"}"#;
        assert!(serde_json::from_str::<ClassificationResult>(json).is_err());
    }

    #[test]
    fn nested_lab_values_are_rejected() {
        let json = r#"{"risk_level": "LOW", "lab_values": {"HbA1c": [5.4]}, "rationale": "x"}"#;
        assert!(serde_json::from_str::<ClassificationResult>(json).is_err());
    }

    #[test]
    fn blank_names_are_reported() {
        let json = r#"{
            "risk_level": "LOW",
            "conditions": [{"name": " "}],
            "medications": [{"name": ""}],
            "rationale": ""
        }"#;
        let r: ClassificationResult = serde_json::from_str(json).unwrap();
        let problems = r.problems();
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.contains("conditions[0]")));
    }
}
