use crate::{
    clock,
    error::SnapshotError,
    metadata::{CollectionMetaData, MetadataRegistry},
    snapshot::SnapshotStore,
    task::{SharedTask, Task, TaskSnapshot},
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestSnapshot {
    pub identifier: String,
    pub seed: i64,
    pub seed_end: i64,
    #[serde(default)]
    pub metadata: BTreeMap<String, CollectionMetaData>,
    #[serde(default)]
    pub tasks: Vec<TaskSnapshot>,
}

#[derive(Debug)]
struct RequestInner {
    seed: i64,
    seed_end: i64,
    tasks: Vec<SharedTask>,
}

/// All operations submitted under one identifier, in submission order.
///
/// Structural changes (history append, seed-end growth) happen under one
/// async lock and are followed by a snapshot write before the lock is
/// released.
#[derive(Debug)]
pub struct Request {
    identifier: String,
    inner: Mutex<RequestInner>,
    metadata: MetadataRegistry,
    snapshots: SnapshotStore,
}

impl Request {
    pub fn new(identifier: impl Into<String>, snapshots: SnapshotStore) -> Self {
        let seed = clock::next_seed();
        Self {
            identifier: identifier.into(),
            inner: Mutex::new(RequestInner {
                seed,
                seed_end: seed,
                tasks: Vec::new(),
            }),
            metadata: MetadataRegistry::new(),
            snapshots,
        }
    }

    pub fn from_snapshot(
        snapshot: RequestSnapshot,
        snapshots: SnapshotStore,
        state_capacity: usize,
    ) -> Self {
        let tasks = snapshot
            .tasks
            .into_iter()
            .map(|t| Arc::new(Task::from_snapshot(t, state_capacity)))
            .collect();
        Self {
            identifier: snapshot.identifier,
            inner: Mutex::new(RequestInner {
                seed: snapshot.seed,
                seed_end: snapshot.seed_end,
                tasks,
            }),
            metadata: MetadataRegistry::from_snapshot(snapshot.metadata),
            snapshots,
        }
    }

    /// Reloads the persisted request for `identifier`, or starts a new one.
    pub async fn load_or_new(
        identifier: &str,
        snapshots: SnapshotStore,
        state_capacity: usize,
    ) -> Result<Self, SnapshotError> {
        match snapshots.read::<RequestSnapshot>(identifier).await? {
            Some(snapshot) => {
                info!(
                    identifier,
                    tasks = snapshot.tasks.len(),
                    "request reloaded from snapshot"
                );
                Ok(Self::from_snapshot(snapshot, snapshots, state_capacity))
            }
            None => Ok(Self::new(identifier, snapshots)),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    pub async fn seed(&self) -> i64 {
        self.inner.lock().await.seed
    }

    pub async fn seed_end(&self) -> i64 {
        self.inner.lock().await.seed_end
    }

    /// Appends to the history and persists the request.
    pub async fn add_task(&self, task: SharedTask) -> Result<(), SnapshotError> {
        let mut inner = self.inner.lock().await;
        debug!(
            identifier = %self.identifier,
            result_seed = task.result_seed,
            operation = %task.operation,
            "task added to request"
        );
        inner.tasks.push(task);
        self.save_locked(&inner).await
    }

    /// Grows the request-level SeedEnd. Non-positive deltas are ignored.
    pub async fn add_to_seed_end(&self, delta: i64) -> Result<(), SnapshotError> {
        if delta <= 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner.seed_end += delta;
        self.save_locked(&inner).await
    }

    /// History in submission order.
    pub async fn history(&self) -> Vec<SharedTask> {
        self.inner.lock().await.tasks.clone()
    }

    pub async fn find_task(&self, result_seed: i64) -> Option<SharedTask> {
        self.inner
            .lock()
            .await
            .tasks
            .iter()
            .find(|t| t.result_seed == result_seed)
            .cloned()
    }

    pub async fn pending_tasks(&self) -> Vec<SharedTask> {
        self.inner
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| t.is_pending())
            .cloned()
            .collect()
    }

    pub async fn save(&self) -> Result<(), SnapshotError> {
        let inner = self.inner.lock().await;
        self.save_locked(&inner).await
    }

    pub async fn snapshot(&self) -> RequestSnapshot {
        let inner = self.inner.lock().await;
        self.snapshot_locked(&inner).await
    }

    async fn snapshot_locked(&self, inner: &RequestInner) -> RequestSnapshot {
        let tasks = join_all(inner.tasks.iter().map(|task| task.snapshot())).await;
        RequestSnapshot {
            identifier: self.identifier.clone(),
            seed: inner.seed,
            seed_end: inner.seed_end,
            metadata: self.metadata.snapshot().await,
            tasks,
        }
    }

    async fn save_locked(&self, inner: &RequestInner) -> Result<(), SnapshotError> {
        let snapshot = self.snapshot_locked(inner).await;
        self.snapshots.write(&self.identifier, &snapshot).await?;
        Ok(())
    }
}

/// Requests keyed by identifier. The map lock covers only the lookup of a
/// per-identifier cell; loading a snapshot happens inside that cell.
#[derive(Debug)]
pub struct RequestRegistry {
    requests: RwLock<HashMap<String, Arc<OnceCell<Arc<Request>>>>>,
    snapshots: SnapshotStore,
    state_capacity: usize,
}

impl RequestRegistry {
    pub fn new(snapshots: SnapshotStore, state_capacity: usize) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            snapshots,
            state_capacity,
        }
    }

    pub async fn get_or_create(&self, identifier: &str) -> Result<Arc<Request>, SnapshotError> {
        let cell = self.cell(identifier).await;
        cell.get_or_try_init(|| async {
            Request::load_or_new(identifier, self.snapshots.clone(), self.state_capacity)
                .await
                .map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Only requests already created or loaded in this process.
    pub async fn get(&self, identifier: &str) -> Option<Arc<Request>> {
        self.requests
            .read()
            .await
            .get(identifier)
            .and_then(|cell| cell.get().cloned())
    }

    async fn cell(&self, identifier: &str) -> Arc<OnceCell<Arc<Request>>> {
        if let Some(cell) = self.requests.read().await.get(identifier) {
            return cell.clone();
        }
        self.requests
            .write()
            .await
            .entry(identifier.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskTarget;
    use model::{ClusterConfig, CollectionId, CollectionIdentifier, OperationConfig, OperationKind};

    fn task(result_seed: i64) -> SharedTask {
        let cluster = ClusterConfig::new("mem://local");
        let collection = CollectionId::default_in("b");
        let target = TaskTarget {
            identifier: CollectionIdentifier::new("req", &cluster, &collection),
            cluster,
            collection,
        };
        Arc::new(Task::new(
            OperationKind::Insert,
            result_seed,
            target,
            OperationConfig::new(0, 5),
            0,
            5,
            8,
        ))
    }

    #[tokio::test]
    async fn every_append_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path());
        let request = Request::new("req", snapshots.clone());
        request.add_task(task(1)).await.unwrap();
        request.add_task(task(2)).await.unwrap();
        request.add_to_seed_end(5).await.unwrap();

        let reloaded = Request::load_or_new("req", snapshots, 8).await.unwrap();
        assert_eq!(reloaded.seed().await, request.seed().await);
        assert_eq!(reloaded.seed_end().await, request.seed().await + 5);
        let seeds: Vec<i64> = reloaded
            .history()
            .await
            .iter()
            .map(|t| t.result_seed)
            .collect();
        assert_eq!(seeds, vec![1, 2]);
        assert_eq!(reloaded.pending_tasks().await.len(), 2);
        assert!(reloaded.find_task(2).await.is_some());
        assert!(reloaded.find_task(3).await.is_none());
    }

    #[tokio::test]
    async fn registry_returns_one_request_per_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RequestRegistry::new(SnapshotStore::new(dir.path()), 8);
        let a = registry.get_or_create("x").await.unwrap();
        let b = registry.get_or_create("x").await.unwrap();
        let c = registry.get_or_create("y").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(registry.get("z").await.is_none());
    }
}
