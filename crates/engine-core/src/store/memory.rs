use super::{
    GetResult, LookupInResult, MutateInSpec, MutationResult, StoreClient, StoreOptions,
    StoreSemantic,
};
use crate::error::StoreError;
use async_trait::async_trait;
use model::document::{get_path, remove_path, set_path};
use serde_json::{Map, Value, json};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredDoc {
    value: Value,
    cas: u64,
    expires_at: Option<Instant>,
}

impl StoredDoc {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// Process-local store honouring the same error contract as a real cluster.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, StoredDoc>>,
    cas: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_cas(&self) -> u64 {
        self.cas.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Overwrites a document without any semantics checks.
    pub async fn put_raw(&self, key: &str, value: Value) {
        let cas = self.next_cas();
        self.docs.write().await.insert(
            key.to_string(),
            StoredDoc {
                value,
                cas,
                expires_at: None,
            },
        );
    }

    /// Current document body, ignoring expiry.
    pub async fn peek(&self, key: &str) -> Option<Value> {
        self.docs.read().await.get(key).map(|d| d.value.clone())
    }

    pub async fn len(&self) -> usize {
        self.docs
            .read()
            .await
            .values()
            .filter(|d| d.is_live())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_cas(key: &str, doc: &StoredDoc, opts: &StoreOptions) -> Result<(), StoreError> {
        match opts.cas {
            Some(cas) if cas != doc.cas => Err(StoreError::CasMismatch {
                key: key.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn expiry(opts: &StoreOptions) -> Option<Instant> {
        opts.expiry.map(|ttl| Instant::now() + ttl)
    }

    fn apply_spec(key: &str, doc: &mut Value, spec: &MutateInSpec) -> Result<(), StoreError> {
        let path = spec.path().to_string();
        match spec {
            MutateInSpec::Insert { value, .. } => {
                if get_path(doc, &path).is_some() {
                    return Err(StoreError::PathExists {
                        key: key.to_string(),
                        path,
                    });
                }
                Self::set(key, doc, &path, value.clone())
            }
            MutateInSpec::Upsert { value, .. } => Self::set(key, doc, &path, value.clone()),
            MutateInSpec::Remove { .. } => remove_path(doc, &path)
                .map(|_| ())
                .ok_or(StoreError::PathNotFound {
                    key: key.to_string(),
                    path,
                }),
            MutateInSpec::Increment { delta, .. } => {
                let current = match get_path(doc, &path) {
                    None => 0,
                    Some(v) => v.as_i64().ok_or_else(|| {
                        StoreError::Other(format!("path mismatch | key={key} path={path}"))
                    })?,
                };
                Self::set(key, doc, &path, json!(current + delta))
            }
        }
    }

    fn set(key: &str, doc: &mut Value, path: &str, value: Value) -> Result<(), StoreError> {
        if set_path(doc, path, value) {
            Ok(())
        } else {
            Err(StoreError::Other(format!(
                "path mismatch | key={key} path={path}"
            )))
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get(&self, key: &str, _opts: &StoreOptions) -> Result<GetResult, StoreError> {
        let docs = self.docs.read().await;
        match docs.get(key) {
            Some(doc) if doc.is_live() => Ok(GetResult {
                value: doc.value.clone(),
                cas: doc.cas,
            }),
            _ => Err(StoreError::DocumentNotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn insert(
        &self,
        key: &str,
        value: Value,
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        let mut docs = self.docs.write().await;
        if docs.get(key).is_some_and(StoredDoc::is_live) {
            return Err(StoreError::DocumentExists {
                key: key.to_string(),
            });
        }
        let cas = self.next_cas();
        docs.insert(
            key.to_string(),
            StoredDoc {
                value,
                cas,
                expires_at: Self::expiry(opts),
            },
        );
        Ok(MutationResult { cas })
    }

    async fn upsert(
        &self,
        key: &str,
        value: Value,
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        let mut docs = self.docs.write().await;
        if let Some(existing) = docs.get(key).filter(|d| d.is_live()) {
            Self::check_cas(key, existing, opts)?;
        }
        let cas = self.next_cas();
        docs.insert(
            key.to_string(),
            StoredDoc {
                value,
                cas,
                expires_at: Self::expiry(opts),
            },
        );
        Ok(MutationResult { cas })
    }

    async fn remove(&self, key: &str, opts: &StoreOptions) -> Result<MutationResult, StoreError> {
        let mut docs = self.docs.write().await;
        match docs.get(key).filter(|d| d.is_live()) {
            Some(existing) => {
                Self::check_cas(key, existing, opts)?;
                docs.remove(key);
                Ok(MutationResult {
                    cas: self.next_cas(),
                })
            }
            None => Err(StoreError::DocumentNotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn touch(&self, key: &str, opts: &StoreOptions) -> Result<MutationResult, StoreError> {
        let mut docs = self.docs.write().await;
        match docs.get_mut(key).filter(|d| d.is_live()) {
            Some(doc) => {
                doc.expires_at = Self::expiry(opts);
                doc.cas = self.next_cas();
                Ok(MutationResult { cas: doc.cas })
            }
            None => Err(StoreError::DocumentNotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn mutate_in(
        &self,
        key: &str,
        specs: &[MutateInSpec],
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        let mut docs = self.docs.write().await;
        let existing = docs.get(key).filter(|d| d.is_live()).cloned();

        let mut body = match (&existing, opts.semantic) {
            (Some(_), StoreSemantic::Insert) => {
                return Err(StoreError::DocumentExists {
                    key: key.to_string(),
                });
            }
            (Some(doc), _) => {
                Self::check_cas(key, doc, opts)?;
                doc.value.clone()
            }
            (None, StoreSemantic::Replace) => {
                return Err(StoreError::DocumentNotFound {
                    key: key.to_string(),
                });
            }
            (None, _) => Value::Object(Map::new()),
        };

        // All specs apply or none do.
        for spec in specs {
            Self::apply_spec(key, &mut body, spec)?;
        }

        let cas = self.next_cas();
        let expires_at = match (&existing, opts.expiry) {
            (_, Some(_)) => Self::expiry(opts),
            (Some(doc), None) => doc.expires_at,
            (None, None) => None,
        };
        docs.insert(
            key.to_string(),
            StoredDoc {
                value: body,
                cas,
                expires_at,
            },
        );
        Ok(MutationResult { cas })
    }

    async fn lookup_in(
        &self,
        key: &str,
        paths: &[String],
        _opts: &StoreOptions,
    ) -> Result<LookupInResult, StoreError> {
        let docs = self.docs.read().await;
        let doc = docs
            .get(key)
            .filter(|d| d.is_live())
            .ok_or_else(|| StoreError::DocumentNotFound {
                key: key.to_string(),
            })?;
        Ok(LookupInResult {
            cas: doc.cas,
            values: paths
                .iter()
                .map(|p| get_path(&doc.value, p).cloned())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn opts() -> StoreOptions {
        StoreOptions::default()
    }

    #[tokio::test]
    async fn insert_twice_reports_exists() {
        let store = MemoryStore::new();
        store.insert("k", json!({"a": 1}), &opts()).await.unwrap();
        let err = store.insert("k", json!({"a": 2}), &opts()).await.unwrap_err();
        assert!(matches!(err, StoreError::DocumentExists { .. }));
        assert!(err.is_already_present());
        assert_eq!(store.get("k", &opts()).await.unwrap().value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn remove_missing_reports_not_found() {
        let store = MemoryStore::new();
        let err = store.remove("nope", &opts()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "document not found | key=nope");
    }

    #[tokio::test]
    async fn cas_mismatch_rejects_upsert() {
        let store = MemoryStore::new();
        let first = store.upsert("k", json!({}), &opts()).await.unwrap();
        let stale = StoreOptions {
            cas: Some(first.cas + 100),
            ..opts()
        };
        assert!(matches!(
            store.upsert("k", json!({"b": 1}), &stale).await,
            Err(StoreError::CasMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn mutate_in_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .insert("k", json!({"sub": {"x": 1}}), &opts())
            .await
            .unwrap();

        let specs = vec![
            MutateInSpec::Upsert {
                path: "sub.y".into(),
                value: json!(2),
            },
            MutateInSpec::Insert {
                path: "sub.x".into(),
                value: json!(3),
            },
        ];
        let err = store.mutate_in("k", &specs, &opts()).await.unwrap_err();
        assert!(matches!(err, StoreError::PathExists { .. }));
        assert_eq!(store.peek("k").await, Some(json!({"sub": {"x": 1}})));
    }

    #[tokio::test]
    async fn mutate_in_upsert_semantic_creates_document() {
        let store = MemoryStore::new();
        let specs = vec![
            MutateInSpec::Insert {
                path: "sub.v".into(),
                value: json!("a"),
            },
            MutateInSpec::Increment {
                path: "_mutated".into(),
                delta: 1,
            },
        ];
        let upsert = opts().with_semantic(StoreSemantic::Upsert);
        store.mutate_in("k", &specs, &upsert).await.unwrap();

        let looked = store
            .lookup_in("k", &["sub.v".to_string(), "missing".to_string()], &opts())
            .await
            .unwrap();
        assert_eq!(looked.values, vec![Some(json!("a")), None]);
        assert_eq!(
            store.peek("k").await.unwrap().get("_mutated"),
            Some(&json!(1))
        );
    }

    #[tokio::test]
    async fn touch_with_elapsed_expiry_hides_document() {
        let store = MemoryStore::new();
        store.insert("k", json!({}), &opts()).await.unwrap();
        store
            .touch("k", &opts().with_expiry(Duration::from_millis(0)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.get("k", &opts()).await.unwrap_err().is_not_found());
        assert!(store.is_empty().await);
    }
}
