//! Deterministic key and content generation.
//!
//! Every piece of content is derived from the numeric key alone: the same key
//! always yields the same key string, document, sub-document and mutation
//! sequence, which is what lets validation rebuild expected state without the
//! generated documents ever being stored.

pub mod key;
pub mod stream;
pub mod template;

pub use key::KeyGenerator;
pub use stream::{ContentStream, SubDocument, apply_sub_document};
pub use template::Template;

use model::{ConfigError, OperationConfig};
use serde_json::Value;

/// Key builder plus the template and sizing of one operation config.
#[derive(Debug, Clone)]
pub struct Generator {
    keys: KeyGenerator,
    template: Template,
    doc_size: usize,
}

impl Generator {
    pub fn from_config(cfg: &OperationConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            keys: KeyGenerator::from_config(cfg),
            template: cfg.template.parse()?,
            doc_size: cfg.doc_size,
        })
    }

    pub fn build_key(&self, key: i64) -> String {
        self.keys.build_key(key)
    }

    pub fn template(&self) -> Template {
        self.template
    }

    pub fn doc_size(&self) -> usize {
        self.doc_size
    }

    /// Freshly generated document for `key`.
    pub fn generate_document(&self, key: i64) -> Value {
        ContentStream::for_document(key).generate(self.template, self.doc_size)
    }

    /// Freshly generated sub-document paths for `key`.
    pub fn generate_sub_path_and_value(&self, key: i64) -> SubDocument {
        ContentStream::for_sub_document(key).generate_sub_document(self.doc_size)
    }
}
