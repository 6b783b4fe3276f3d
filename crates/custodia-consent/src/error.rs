use thiserror::Error;

/// Errors from the consent, request and revocation workflows.
///
/// Denials and partial bulk failures are ordinary values and never appear
/// here. These variants cover lookups and transitions a caller asked for
/// explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsentError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid state transition for {kind} {id}: {from} -> {to}")]
    InvalidStateTransition {
        kind: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("validation error: {0}")]
    Validation(String),
}

impl ConsentError {
    pub fn consent_not_found(id: impl Into<String>) -> Self {
        ConsentError::NotFound {
            kind: "consent",
            id: id.into(),
        }
    }

    pub fn request_not_found(id: impl Into<String>) -> Self {
        ConsentError::NotFound {
            kind: "request",
            id: id.into(),
        }
    }
}

pub type ConsentResult<T> = Result<T, ConsentError>;
