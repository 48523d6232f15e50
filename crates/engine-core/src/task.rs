use crate::{
    result::TaskResult,
    state::{TaskState, TaskStateSnapshot},
};
use model::{ClusterConfig, CollectionId, CollectionIdentifier, OperationConfig, OperationKind};
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::Mutex;

/// Where a task runs: cluster, keyspace coordinates and the full identifier
/// used to scope replay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskTarget {
    pub cluster: ClusterConfig,
    pub collection: CollectionId,
    pub identifier: CollectionIdentifier,
}

/// One entry of a request's history.
#[derive(Debug)]
pub struct Task {
    pub operation: OperationKind,
    pub result_seed: i64,
    pub target: TaskTarget,
    pub config: OperationConfig,
    pub state: TaskState,
    pub result: Mutex<TaskResult>,
    pending: AtomicBool,
    rerun: AtomicBool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub operation: OperationKind,
    pub result_seed: i64,
    pub target: TaskTarget,
    pub config: OperationConfig,
    pub state: TaskStateSnapshot,
    pub result: TaskResult,
    pub pending: bool,
}

impl Task {
    /// New pending task with live state ingestion. `seed_start`/`seed_end`
    /// are the collection keys the config covers.
    pub fn new(
        operation: OperationKind,
        result_seed: i64,
        target: TaskTarget,
        config: OperationConfig,
        seed_start: i64,
        seed_end: i64,
        state_capacity: usize,
    ) -> Self {
        Self {
            operation,
            result_seed,
            target,
            config,
            state: TaskState::config_task_state(seed_start, seed_end, result_seed, state_capacity),
            result: Mutex::new(TaskResult::new(result_seed, operation)),
            pending: AtomicBool::new(true),
            rerun: AtomicBool::new(false),
        }
    }

    pub fn from_snapshot(snapshot: TaskSnapshot, state_capacity: usize) -> Self {
        Self {
            operation: snapshot.operation,
            result_seed: snapshot.result_seed,
            target: snapshot.target,
            config: snapshot.config,
            state: TaskState::from_snapshot(snapshot.state, state_capacity),
            result: Mutex::new(snapshot.result),
            pending: AtomicBool::new(snapshot.pending),
            rerun: AtomicBool::new(false),
        }
    }

    pub fn identifier(&self) -> &CollectionIdentifier {
        &self.target.identifier
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    /// Rerun mode: "already applied" replies count as success.
    pub fn is_rerun(&self) -> bool {
        self.rerun.load(Ordering::SeqCst)
    }

    pub fn set_rerun(&self, rerun: bool) {
        self.rerun.store(rerun, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            operation: self.operation,
            result_seed: self.result_seed,
            target: self.target.clone(),
            config: self.config.clone(),
            state: self.state.snapshot().await,
            result: self.result.lock().await.clone(),
            pending: self.is_pending(),
        }
    }
}

pub type SharedTask = Arc<Task>;

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TaskTarget {
        let cluster = ClusterConfig::new("mem://local");
        let collection = CollectionId::default_in("bucket");
        TaskTarget {
            identifier: CollectionIdentifier::new("req", &cluster, &collection),
            cluster,
            collection,
        }
    }

    #[tokio::test]
    async fn snapshot_restores_flags_and_sets() {
        let task = Task::new(
            OperationKind::Upsert,
            11,
            target(),
            OperationConfig::new(0, 4),
            100,
            104,
            8,
        );
        let reporter = task.state.reporter().await.unwrap();
        reporter.completed(0).await.unwrap();
        reporter.err(1).await.unwrap();
        task.state.stop_storing_state().await;

        let json = serde_json::to_string(&task.snapshot().await).unwrap();
        let restored = Task::from_snapshot(serde_json::from_str(&json).unwrap(), 8);
        assert!(restored.is_pending());
        assert!(!restored.is_rerun());
        assert_eq!(restored.operation, OperationKind::Upsert);
        assert_eq!(restored.state.return_err_offset().await.len(), 1);
        assert_eq!(restored.identifier(), &target().identifier);
        assert!(restored.config.contains(3));
        assert!(!restored.config.contains(4));
    }
}
