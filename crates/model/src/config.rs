use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Longest key the store accepts.
pub const MAX_KEY_SIZE: usize = 250;

pub const DEFAULT_DOC_SIZE: usize = 1024;
pub const DEFAULT_TEMPLATE: &str = "person";

fn default_doc_size() -> usize {
    DEFAULT_DOC_SIZE
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

/// Connection coordinates of the cluster a task runs against.
///
/// Session management lives outside the engine; these values only travel
/// with the task so a client provider can resolve them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterConfig {
    pub connection_str: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ClusterConfig {
    pub fn new(connection_str: impl Into<String>) -> Self {
        Self {
            connection_str: connection_str.into(),
            ..Default::default()
        }
    }
}

/// Retry / ignore policy applied to failed offsets once a sweep ends.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Exceptions {
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub retry_exceptions: Vec<String>,
    #[serde(default)]
    pub ignore_exceptions: Vec<String>,
}

impl Exceptions {
    pub fn is_ignored(&self, signature: &str) -> bool {
        self.ignore_exceptions.iter().any(|s| s == signature)
    }

    pub fn is_retryable(&self, signature: &str) -> bool {
        self.retry_exceptions.iter().any(|s| s == signature)
    }

    /// Number of store calls a single offset may consume.
    pub fn attempts(&self) -> usize {
        self.retry_attempts.max(1) as usize
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OperationConfig {
    pub start: i64,
    pub end: i64,
    #[serde(default = "default_doc_size")]
    pub doc_size: usize,
    /// Zero keeps keys at their natural length.
    #[serde(default)]
    pub key_size: usize,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default)]
    pub key_suffix: String,
    /// Fields a mutation rewrites. Empty means every mutable field.
    #[serde(default)]
    pub fields_to_change: Vec<String>,
    #[serde(default)]
    pub exceptions: Exceptions,
    /// Document expiry in seconds for writes and touches. Zero means none.
    #[serde(default)]
    pub expiry: u64,
    /// Treat live-only paths as integrity failures during validation.
    #[serde(default)]
    pub strict_paths: bool,
}

impl OperationConfig {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            doc_size: DEFAULT_DOC_SIZE,
            key_size: 0,
            template: default_template(),
            key_prefix: String::new(),
            key_suffix: String::new(),
            fields_to_change: Vec::new(),
            exceptions: Exceptions::default(),
            expiry: 0,
            strict_paths: false,
        }
    }

    pub fn with_exceptions(mut self, exceptions: Exceptions) -> Self {
        self.exceptions = exceptions;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_doc_size(mut self, doc_size: usize) -> Self {
        self.doc_size = doc_size;
        self
    }

    pub fn with_fields_to_change(mut self, fields: Vec<String>) -> Self {
        self.fields_to_change = fields;
        self
    }

    pub fn with_expiry(mut self, expiry: u64) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start < 0 || self.start >= self.end {
            return Err(ConfigError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        if self.key_size > MAX_KEY_SIZE {
            return Err(ConfigError::KeySizeTooLarge(self.key_size));
        }
        Ok(())
    }

    /// Whether `offset` falls inside the half-open `[start, end)` range.
    pub fn contains(&self, offset: i64) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range() {
        let cfg = OperationConfig::new(10, 10);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidRange { start: 10, end: 10 })
        );
        assert!(OperationConfig::new(-1, 3).validate().is_err());
        assert!(OperationConfig::new(0, 3).validate().is_ok());
    }

    #[test]
    fn range_is_half_open() {
        let cfg = OperationConfig::new(5, 8);
        assert!(!cfg.contains(4));
        assert!(cfg.contains(5));
        assert!(cfg.contains(7));
        assert!(!cfg.contains(8));
        assert_eq!(cfg.len(), 3);
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: OperationConfig = serde_json::from_str(r#"{"start":0,"end":4}"#).unwrap();
        assert_eq!(cfg.doc_size, DEFAULT_DOC_SIZE);
        assert_eq!(cfg.template, "person");
        assert_eq!(cfg.exceptions.attempts(), 1);
        assert!(!cfg.strict_paths);
    }

    #[test]
    fn attempts_never_drop_below_one() {
        let mut exceptions = Exceptions::default();
        assert_eq!(exceptions.attempts(), 1);
        exceptions.retry_attempts = 3;
        assert_eq!(exceptions.attempts(), 3);
    }
}
