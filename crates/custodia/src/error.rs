use thiserror::Error;

/// Error type for the custodia service shell and CLI, aggregating the
/// errors of the library crates.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("core error: {0}")]
    Core(#[from] custodia_core::CoreError),

    #[error("consent error: {0}")]
    Consent(#[from] custodia_consent::ConsentError),

    #[error("policy error: {0}")]
    Policy(#[from] custodia_policy::PolicyError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("reconciliation error: {0}")]
    Reconciliation(String),
}

impl From<serde_json::Error> for RootError {
    fn from(e: serde_json::Error) -> Self {
        RootError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;
