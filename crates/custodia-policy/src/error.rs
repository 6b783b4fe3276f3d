use thiserror::Error;

/// Errors from loading policies or running an audited evaluation.
///
/// A denied access is an `EvaluationResult` with `allowed == false`,
/// never a `PolicyError`.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy load error: {0}")]
    LoadError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid evaluation context: {0}")]
    InvalidContext(String),

    #[error("audit sink error: {0}")]
    AuditSinkError(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
