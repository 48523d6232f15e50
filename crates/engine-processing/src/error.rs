use engine_core::error::{StateError, StoreError};
use model::ConfigError;
use thiserror::Error;

/// Failure of a single offset. Rendered text keeps the `<kind> | <context>`
/// shape so the signature survives into the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffsetError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("integrity lost | key={key} {detail}")]
    Integrity { key: String, detail: String },
}

impl OffsetError {
    pub fn integrity(key: &str, detail: impl Into<String>) -> Self {
        OffsetError::Integrity {
            key: key.to_string(),
            detail: detail.into(),
        }
    }

    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            OffsetError::Store(e) => Some(e),
            OffsetError::Integrity { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("invalid operation config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),
}
