use model::OperationConfig;

/// Builds `prefix + number + suffix` keys.
///
/// When a key size is configured and the bare key is shorter, the number is
/// left-padded with zeros so every key of the run has the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyGenerator {
    prefix: String,
    suffix: String,
    key_size: usize,
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>, key_size: usize) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            key_size,
        }
    }

    pub fn from_config(cfg: &OperationConfig) -> Self {
        Self::new(cfg.key_prefix.clone(), cfg.key_suffix.clone(), cfg.key_size)
    }

    pub fn build_key(&self, key: i64) -> String {
        let width = self
            .key_size
            .saturating_sub(self.prefix.len() + self.suffix.len());
        format!("{}{:0>width$}{}", self.prefix, key, self.suffix)
    }
}
