use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown {kind}: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("invalid id: {0}")]
    InvalidId(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
