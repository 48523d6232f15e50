//! Per-task offset bookkeeping.
//!
//! Sweep workers never lock the offset sets. They push [`StateEvent`]s through
//! a [`StateReporter`] into a single ingestion actor, which is the only writer.
//! Stopping ingestion drains whatever is already queued, after which the sets
//! are final for that run.

use crate::{
    actor::{ActorRef, spawn_actor},
    error::StateError,
};
use ingest::{StateIngestor, StateMsg};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, warn};

mod ingest;
pub mod sets;

pub use sets::{OffsetSets, OffsetStatus, StateEvent};

pub const DEFAULT_STATE_CHANNEL_CAPACITY: usize = 1024;

struct Ingestion {
    actor: ActorRef<StateMsg>,
    handle: JoinHandle<()>,
}

/// Cloneable sending side handed to sweep workers.
#[derive(Debug, Clone)]
pub struct StateReporter {
    actor: ActorRef<StateMsg>,
}

impl StateReporter {
    pub async fn report(&self, event: StateEvent) -> Result<(), StateError> {
        self.actor
            .send(StateMsg::Event(event))
            .await
            .map_err(|e| StateError::Report {
                offset: event.offset,
                reason: e.to_string(),
            })
    }

    pub async fn completed(&self, offset: i64) -> Result<(), StateError> {
        self.report(StateEvent::completed(offset)).await
    }

    pub async fn err(&self, offset: i64) -> Result<(), StateError> {
        self.report(StateEvent::err(offset)).await
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskStateSnapshot {
    pub seed_start: i64,
    pub seed_end: i64,
    pub result_seed: i64,
    #[serde(flatten)]
    pub sets: OffsetSets,
}

pub struct TaskState {
    pub seed_start: i64,
    pub seed_end: i64,
    pub result_seed: i64,
    sets: Arc<RwLock<OffsetSets>>,
    ingestion: Mutex<Option<Ingestion>>,
    capacity: usize,
}

impl std::fmt::Debug for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskState")
            .field("seed_start", &self.seed_start)
            .field("seed_end", &self.seed_end)
            .field("result_seed", &self.result_seed)
            .finish_non_exhaustive()
    }
}

impl TaskState {
    /// Empty sets with ingestion already running. Must be called inside a
    /// Tokio runtime.
    pub fn config_task_state(
        seed_start: i64,
        seed_end: i64,
        result_seed: i64,
        capacity: usize,
    ) -> Self {
        let sets = Arc::new(RwLock::new(OffsetSets::default()));
        let ingestion = Self::spawn_ingestion(result_seed, sets.clone(), capacity);
        Self {
            seed_start,
            seed_end,
            result_seed,
            sets,
            ingestion: Mutex::new(Some(ingestion)),
            capacity,
        }
    }

    /// Rebuilds a stopped state from its persisted record.
    pub fn from_snapshot(snapshot: TaskStateSnapshot, capacity: usize) -> Self {
        Self {
            seed_start: snapshot.seed_start,
            seed_end: snapshot.seed_end,
            result_seed: snapshot.result_seed,
            sets: Arc::new(RwLock::new(snapshot.sets)),
            ingestion: Mutex::new(None),
            capacity,
        }
    }

    fn spawn_ingestion(
        result_seed: i64,
        sets: Arc<RwLock<OffsetSets>>,
        capacity: usize,
    ) -> Ingestion {
        let (actor, handle) = spawn_actor(
            format!("task-state-{result_seed}"),
            capacity,
            StateIngestor::new(sets),
        );
        Ingestion { actor, handle }
    }

    /// Restarts ingestion for a rerun or retry pass. Recorded offsets are kept.
    pub async fn setup_storing_keys(&self) {
        let mut slot = self.ingestion.lock().await;
        if slot.as_ref().is_some_and(|i| !i.actor.is_closed()) {
            return;
        }
        debug!(result_seed = self.result_seed, "starting task state ingestion");
        *slot = Some(Self::spawn_ingestion(
            self.result_seed,
            self.sets.clone(),
            self.capacity,
        ));
    }

    pub async fn reporter(&self) -> Result<StateReporter, StateError> {
        match self.ingestion.lock().await.as_ref() {
            Some(ingestion) if !ingestion.actor.is_closed() => Ok(StateReporter {
                actor: ingestion.actor.clone(),
            }),
            _ => Err(StateError::IngestionStopped),
        }
    }

    /// Drains queued events and halts ingestion. Safe to call repeatedly.
    pub async fn stop_storing_state(&self) {
        let Some(ingestion) = self.ingestion.lock().await.take() else {
            return;
        };
        if ingestion.actor.send(StateMsg::Stop).await.is_err() {
            warn!(
                result_seed = self.result_seed,
                "task state ingestion already closed"
            );
        }
        if let Err(e) = ingestion.handle.await {
            warn!(result_seed = self.result_seed, error = %e, "task state ingestion panicked");
        }
    }

    pub async fn is_ingesting(&self) -> bool {
        self.ingestion.lock().await.is_some()
    }

    pub async fn return_completed_offset(&self) -> BTreeSet<i64> {
        self.sets.read().await.completed.clone()
    }

    pub async fn return_err_offset(&self) -> BTreeSet<i64> {
        self.sets.read().await.err.clone()
    }

    /// Completed ∪ Err: offsets a rerun must not resubmit.
    pub async fn recorded_offsets(&self) -> BTreeSet<i64> {
        self.sets.read().await.recorded()
    }

    pub async fn status(&self, offset: i64) -> Option<OffsetStatus> {
        self.sets.read().await.status(offset)
    }

    pub async fn sets(&self) -> OffsetSets {
        self.sets.read().await.clone()
    }

    pub async fn snapshot(&self) -> TaskStateSnapshot {
        TaskStateSnapshot {
            seed_start: self.seed_start,
            seed_end: self.seed_end,
            result_seed: self.result_seed,
            sets: self.sets().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_land_after_stop() {
        let state = TaskState::config_task_state(0, 10, 42, 4);
        let reporter = state.reporter().await.unwrap();
        for offset in 0..10 {
            if offset % 3 == 0 {
                reporter.err(offset).await.unwrap();
            } else {
                reporter.completed(offset).await.unwrap();
            }
        }
        reporter.completed(0).await.unwrap();
        state.stop_storing_state().await;

        let completed = state.return_completed_offset().await;
        let err = state.return_err_offset().await;
        assert_eq!(err.into_iter().collect::<Vec<_>>(), vec![3, 6, 9]);
        assert_eq!(completed.len(), 7);
        assert!(completed.contains(&0));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_reporters() {
        let state = TaskState::config_task_state(0, 1, 7, 4);
        let reporter = state.reporter().await.unwrap();
        state.stop_storing_state().await;
        state.stop_storing_state().await;

        assert!(matches!(
            reporter.completed(0).await,
            Err(StateError::Report { offset: 0, .. })
        ));
        assert!(matches!(
            state.reporter().await,
            Err(StateError::IngestionStopped)
        ));
        assert!(state.return_completed_offset().await.is_empty());
    }

    #[tokio::test]
    async fn restart_keeps_recorded_offsets() {
        let state = TaskState::config_task_state(0, 4, 1, 4);
        state.reporter().await.unwrap().err(2).await.unwrap();
        state.stop_storing_state().await;

        state.setup_storing_keys().await;
        state.reporter().await.unwrap().completed(2).await.unwrap();
        state.stop_storing_state().await;

        assert_eq!(state.status(2).await, Some(OffsetStatus::Completed));
        assert!(state.return_err_offset().await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_json() {
        let state = TaskState::config_task_state(5, 9, 3, 4);
        let reporter = state.reporter().await.unwrap();
        reporter.completed(5).await.unwrap();
        reporter.err(6).await.unwrap();
        state.stop_storing_state().await;

        let json = serde_json::to_string(&state.snapshot().await).unwrap();
        let restored = TaskState::from_snapshot(serde_json::from_str(&json).unwrap(), 4);
        assert!(!restored.is_ingesting().await);
        assert_eq!(restored.recorded_offsets().await, state.recorded_offsets().await);
        assert_eq!(restored.status(6).await, Some(OffsetStatus::Err));
    }
}
