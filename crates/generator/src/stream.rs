use crate::template::{Template, random_string};
use model::document::set_path;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Dotted path → value pairs written by sub-document operations.
pub type SubDocument = BTreeMap<String, Value>;

pub const SUB_DOC_ROOT: &str = "subDoc";
pub const PADDING_FIELD: &str = "padding";

const SUB_DOC_NAMES: [&str; 6] = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"];
const SUB_DOC_STREAM: u64 = 1;

/// Pseudo-random stream seeded with exactly one numeric key.
///
/// Generation and every later mutation draw from the same stream, so
/// replaying the same mutations in the same order on a fresh stream lands on
/// byte-identical content.
#[derive(Debug, Clone)]
pub struct ContentStream {
    rng: ChaCha8Rng,
}

impl ContentStream {
    pub fn for_document(key: i64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(key as u64),
        }
    }

    /// Same seed as the document stream, separate ChaCha stream, so sub-document
    /// content never shifts when document mutations are added or removed.
    pub fn for_sub_document(key: i64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(key as u64);
        rng.set_stream(SUB_DOC_STREAM);
        Self { rng }
    }

    pub fn generate(&mut self, template: Template, doc_size: usize) -> Value {
        let mut doc = template.generate(&mut self.rng);
        self.pad(&mut doc, doc_size);
        doc
    }

    /// Rewrites `fields` (or every mutable field of the template when empty).
    /// Fields the template does not know are left alone.
    pub fn mutate(&mut self, template: Template, doc: &mut Value, fields: &[String]) {
        let names: Vec<&str> = if fields.is_empty() {
            template.mutable_fields().to_vec()
        } else {
            fields.iter().map(String::as_str).collect()
        };
        for field in names {
            if let Some(value) = template.mutate_field(field, &mut self.rng) {
                set_path(doc, field, value);
            }
        }
    }

    pub fn generate_sub_document(&mut self, size: usize) -> SubDocument {
        let value_len = (size / 2).max(8);
        let mut sub = SubDocument::new();
        sub.insert(
            format!("{SUB_DOC_ROOT}.name"),
            json!(SUB_DOC_NAMES[self.rng.gen_range(0..SUB_DOC_NAMES.len())]),
        );
        sub.insert(
            format!("{SUB_DOC_ROOT}.value"),
            json!(random_string(&mut self.rng, value_len)),
        );
        sub.insert(
            format!("{SUB_DOC_ROOT}.rank"),
            json!(self.rng.gen_range(0..10_000)),
        );
        sub
    }

    /// Rewrites every path of `sub`, or only the listed ones when `fields`
    /// names paths the sub-document has.
    pub fn mutate_sub_document(&mut self, sub: &mut SubDocument, fields: &[String]) {
        let targeted: Vec<String> = fields
            .iter()
            .filter(|f| sub.contains_key(f.as_str()))
            .cloned()
            .collect();
        let paths: Vec<String> = if targeted.is_empty() {
            sub.keys().cloned().collect()
        } else {
            targeted
        };

        for path in paths {
            let Some(current) = sub.get(&path) else {
                continue;
            };
            let next = match current {
                Value::String(s) if path.ends_with(".name") => {
                    let choices: Vec<&str> = SUB_DOC_NAMES
                        .iter()
                        .copied()
                        .filter(|n| *n != s.as_str())
                        .collect();
                    json!(choices[self.rng.gen_range(0..choices.len())])
                }
                Value::String(s) => json!(random_string(&mut self.rng, s.len().max(8))),
                Value::Number(n) => {
                    let n = n.as_i64().unwrap_or(0);
                    json!((n + self.rng.gen_range(1..10_000)) % 10_000)
                }
                Value::Bool(b) => json!(!b),
                _ => json!(random_string(&mut self.rng, 8)),
            };
            sub.insert(path, next);
        }
    }

    fn pad(&mut self, doc: &mut Value, doc_size: usize) {
        // `,"padding":""`
        const OVERHEAD: usize = PADDING_FIELD.len() + 6;
        let current = serde_json::to_vec(doc).map(|b| b.len()).unwrap_or(0);
        if doc_size > current + OVERHEAD {
            let padding = random_string(&mut self.rng, doc_size - current - OVERHEAD);
            set_path(doc, PADDING_FIELD, json!(padding));
        }
    }
}

/// Writes sub-document paths into a document.
pub fn apply_sub_document(doc: &mut Value, sub: &SubDocument) {
    for (path, value) in sub {
        set_path(doc, path, value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_reaches_requested_size() {
        let doc = ContentStream::for_document(9).generate(Template::Person, 1024);
        let len = serde_json::to_vec(&doc).unwrap().len();
        assert_eq!(len, 1024);
    }

    #[test]
    fn small_sizes_skip_padding() {
        let doc = ContentStream::for_document(9).generate(Template::Small, 4);
        assert!(doc.get(PADDING_FIELD).is_none());
    }

    #[test]
    fn replaying_mutations_is_deterministic() {
        let fields = vec!["age".to_string(), "status".to_string()];
        let run = || {
            let mut stream = ContentStream::for_document(123);
            let mut doc = stream.generate(Template::Person, 256);
            stream.mutate(Template::Person, &mut doc, &fields);
            stream.mutate(Template::Person, &mut doc, &[]);
            doc
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn mutation_changes_content() {
        let mut stream = ContentStream::for_document(5);
        let original = stream.generate(Template::Small, 0);
        let mut doc = original.clone();
        stream.mutate(Template::Small, &mut doc, &[]);
        assert_ne!(original, doc);
    }

    #[test]
    fn sub_document_mutation_rewrites_all_paths() {
        let mut stream = ContentStream::for_sub_document(77);
        let original = stream.generate_sub_document(64);
        let mut sub = original.clone();
        stream.mutate_sub_document(&mut sub, &[]);
        assert_eq!(sub.len(), original.len());
        for (path, value) in &original {
            assert_ne!(sub.get(path), Some(value), "{path} unchanged");
        }
    }
}
