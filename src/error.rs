use thiserror::Error;

use crate::model::report::ValidateReport;

/// Error taxonomy for the alignment pipeline.
///
/// These are kinds, not exception types: every stage maps whatever it
/// encounters internally (I/O errors, malformed artifacts, failed HTTP
/// calls) onto one of these before recording it in the manifest and
/// propagating a single "stage failed" condition to the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input artifact is missing or fails schema/invariant checks.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external tool (ffmpeg, ffprobe, ...) could not be located.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// An external tool did not report a usable version string.
    #[error("tool version unknown: {0}")]
    ToolVersionUnknown(String),

    /// An HTTP collaborator (ASR or aligner service) is unreachable or
    /// returned a non-retryable error after retries were exhausted.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An HTTP collaborator timed out.
    #[error("service timeout: {0}")]
    ServiceTimeout(String),

    /// A stage algorithm could not satisfy its invariants (e.g. the window
    /// planner with `strictTail=true` and no feasible path).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Cooperative cancellation was requested mid-stage.
    #[error("cancellation requested")]
    CancellationRequested,

    /// A prior artifact failed its schema or invariant check on load.
    #[error("artifact corruption: {0}")]
    ArtifactCorruption(String),

    /// Reserved for the validator: not a runtime failure. The validator
    /// writes a repair plan and the CLI exits with code 2.
    #[error("gate failure: {} gate(s) failed", .0.failing_gate_count())]
    GateFailure(Box<ValidateReport>),
}

impl PipelineError {
    /// The process exit code this error kind should map to (spec §6.5).
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::GateFailure(_) => 2,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::InvalidInput(format!("io error: {e}"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::ArtifactCorruption(format!("json error: {e}"))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PipelineError::ServiceTimeout(e.to_string())
        } else {
            PipelineError::ServiceUnavailable(e.to_string())
        }
    }
}
