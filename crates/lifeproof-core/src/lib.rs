//! Core types for LifeProof: document records, classification results, and pipeline config.

pub mod config;
pub mod record;
pub mod result;

pub use config::{ConfigError, PipelineConfig, RetryPolicy};
pub use record::{
    DocumentRecord, DocumentStatus, ModelTier, RiskLevel, Transition, TransitionError,
    UnknownVariant, truncate_chars,
};
pub use result::{
    ClassificationResult, Condition, Confidence, LabValue, LifestyleFlags, Medication, Procedure,
    RiskTier,
};
