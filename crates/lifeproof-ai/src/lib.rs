//! Classification: model-tier routing, the underwriting prompt, validated
//! parsing of model output, retrying invocation, the classifier worker, and
//! gold-standard regression evaluation.

pub mod client;
pub mod error;
pub mod eval;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod routing;
pub mod worker;

#[cfg(feature = "http")]
pub mod http;

pub use client::{InvocationError, ModelClient, ModelRequest};
pub use error::ClassifyError;
pub use eval::{EvalReport, Evaluator, GoldCase, load_gold_standard};
pub use parser::{ParseError, parse_classification};
pub use routing::{estimate_tokens, model_for, select_tier};
pub use worker::{Classification, Classifier, ClassifierWorker};

#[cfg(feature = "http")]
pub use http::AnthropicClient;
