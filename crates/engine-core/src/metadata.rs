use crate::{clock, error::MetadataError};
use model::{CollectionIdentifier, OperationConfig};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Key-space bookkeeping for one collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionMetaData {
    pub seed: i64,
    pub seed_end: i64,
    pub doc_size: usize,
    pub key_size: usize,
    pub template: String,
}

impl CollectionMetaData {
    pub fn new(seed: i64, defaults: &OperationConfig) -> Self {
        Self {
            seed,
            seed_end: seed,
            doc_size: defaults.doc_size,
            key_size: defaults.key_size,
            template: defaults.template.clone(),
        }
    }

    /// Grows SeedEnd by `delta`. Non-positive deltas are ignored.
    pub fn add_to_seed_end(&mut self, delta: i64) {
        if delta > 0 {
            self.seed_end += delta;
        }
    }

    /// Widens SeedEnd so that `[seed, seed + end)` is covered.
    pub fn cover(&mut self, end: i64) {
        let delta = self.seed + end - self.seed_end;
        self.add_to_seed_end(delta);
    }

    pub fn key(&self, offset: i64) -> i64 {
        self.seed + offset
    }
}

pub type SharedMetaData = Arc<Mutex<CollectionMetaData>>;

/// Lazily populated map of collection metadata.
///
/// The map lock is held only for lookup or insert; seed-end growth goes
/// through each entry's own lock.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: RwLock<HashMap<CollectionIdentifier, SharedMetaData>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing entry, or a new one seeded from the nanosecond clock.
    pub async fn get_collection_metadata(
        &self,
        identifier: &CollectionIdentifier,
        defaults: &OperationConfig,
    ) -> SharedMetaData {
        if let Some(entry) = self.entries.read().await.get(identifier) {
            return entry.clone();
        }

        let mut entries = self.entries.write().await;
        entries
            .entry(identifier.clone())
            .or_insert_with(|| {
                let seed = clock::next_seed();
                info!(collection = %identifier, seed, "collection metadata created");
                Arc::new(Mutex::new(CollectionMetaData::new(seed, defaults)))
            })
            .clone()
    }

    /// Entry that must already exist.
    pub async fn lookup(
        &self,
        identifier: &CollectionIdentifier,
    ) -> Result<SharedMetaData, MetadataError> {
        self.entries
            .read()
            .await
            .get(identifier)
            .cloned()
            .ok_or_else(|| MetadataError::UnknownCollection(identifier.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> BTreeMap<String, CollectionMetaData> {
        let entries: Vec<(CollectionIdentifier, SharedMetaData)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut out = BTreeMap::new();
        for (id, entry) in entries {
            out.insert(id.to_string(), entry.lock().await.clone());
        }
        out
    }

    pub fn from_snapshot(snapshot: BTreeMap<String, CollectionMetaData>) -> Self {
        let entries = snapshot
            .into_iter()
            .map(|(id, meta)| {
                (
                    CollectionIdentifier::from(id.as_str()),
                    Arc::new(Mutex::new(meta)),
                )
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> CollectionIdentifier {
        CollectionIdentifier::from(name)
    }

    #[test]
    fn seed_end_only_widens() {
        let mut meta = CollectionMetaData::new(1_000, &OperationConfig::new(0, 10));
        meta.cover(10);
        assert_eq!(meta.seed_end, 1_010);
        meta.cover(5);
        meta.add_to_seed_end(-50);
        assert_eq!(meta.seed_end, 1_010);
        meta.add_to_seed_end(5);
        assert_eq!(meta.seed_end, 1_015);
    }

    #[tokio::test]
    async fn same_identifier_shares_entry() {
        let registry = MetadataRegistry::new();
        let cfg = OperationConfig::new(0, 10).with_doc_size(64);
        let a = registry.get_collection_metadata(&id("t:c:b:s:x"), &cfg).await;
        let b = registry.get_collection_metadata(&id("t:c:b:s:x"), &cfg).await;
        let other = registry.get_collection_metadata(&id("t:c:b:s:y"), &cfg).await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_ne!(a.lock().await.seed, other.lock().await.seed);
        assert_eq!(a.lock().await.doc_size, 64);
        assert!(registry.lookup(&id("t:c:b:s:z")).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_keeps_seed() {
        let registry = MetadataRegistry::new();
        let entry = registry
            .get_collection_metadata(&id("t:c:b:s:x"), &OperationConfig::new(0, 3))
            .await;
        entry.lock().await.cover(3);
        let seed = entry.lock().await.seed;

        let restored = MetadataRegistry::from_snapshot(registry.snapshot().await);
        let reloaded = restored.lookup(&id("t:c:b:s:x")).await.unwrap();
        assert_eq!(reloaded.lock().await.seed, seed);
        assert_eq!(reloaded.lock().await.seed_end, seed + 3);
    }
}
