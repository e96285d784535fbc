use std::time::Duration;

/// Failures that end the current user action.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PipelineError {
    #[error("data validation failed: {0}")]
    InputValidation(String),
    #[error("text generation service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("text generation timed out after {}s", .0.as_secs())]
    ServiceTimeout(Duration),
    #[error("could not parse {stage} output: {reason}\n--- raw output ---\n{raw}")]
    OutputParsing {
        stage: &'static str,
        reason: String,
        raw: String,
    },
    #[error("{0}")]
    Precondition(String),
}

impl PipelineError {
    pub fn parsing(stage: &'static str, reason: impl Into<String>, raw: &str) -> Self {
        Self::OutputParsing {
            stage,
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

/// A single statistical facet could not be computed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("no rows available")]
    Empty,
    #[error("column {0} has zero variance")]
    ZeroVariance(&'static str),
    #[error("need at least {needed} observations, got {got}")]
    TooFewObservations { needed: usize, got: usize },
}
