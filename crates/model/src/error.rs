use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("operation config is missing")]
    MissingConfig,

    #[error("invalid offset range: start {start} must be >= 0 and < end {end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("key size {0} exceeds the maximum key length of {max}", max = crate::config::MAX_KEY_SIZE)]
    KeySizeTooLarge(usize),

    #[error("unknown document template '{0}'")]
    UnknownTemplate(String),

    #[error("missing collection coordinates: {0}")]
    MissingCollection(String),

    #[error("{operation} does not accept {field}")]
    Unsupported {
        operation: String,
        field: &'static str,
    },
}
