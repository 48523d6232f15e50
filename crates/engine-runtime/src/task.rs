//! Task lifecycle: Config, Do, TearUp.
//!
//! Config validates the operation, reserves the key space on the collection
//! metadata and appends the task to its request. Do runs the sweep followed
//! by the failure classifier. TearUp persists the outcome: result file,
//! cleared pending flag and a fresh request snapshot.

use crate::error::TaskError;
use engine_core::{
    clock,
    request::Request,
    result::{ResultStore, TaskResult},
    store::StoreClient,
    task::{SharedTask, Task, TaskTarget},
};
use engine_processing::{
    classifier::classify_failures,
    executor::{BulkExecutor, SweepTarget},
    replay::ReplayHistory,
};
use generator::Generator;
use model::{Exceptions, OperationConfig, OperationKind};
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Unit of work queued on the task manager.
pub enum Job {
    /// Sweep a configured task, fresh or resumed.
    Run {
        request: Arc<Request>,
        task: SharedTask,
        client: Arc<dyn StoreClient>,
        cancel: CancellationToken,
    },
    /// Re-classify a finished task's failures under a new policy.
    RetryExceptions {
        request: Arc<Request>,
        target: SharedTask,
        exceptions: Exceptions,
        result_seed: i64,
        client: Arc<dyn StoreClient>,
        cancel: CancellationToken,
    },
}

impl Job {
    pub fn result_seed(&self) -> i64 {
        match self {
            Job::Run { task, .. } => task.result_seed,
            Job::RetryExceptions { result_seed, .. } => *result_seed,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        match self {
            Job::Run { cancel, .. } | Job::RetryExceptions { cancel, .. } => cancel,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Run { request, task, .. } => f
                .debug_struct("Run")
                .field("request", &request.identifier())
                .field("result_seed", &task.result_seed)
                .field("operation", &task.operation)
                .finish(),
            Job::RetryExceptions {
                request,
                target,
                result_seed,
                ..
            } => f
                .debug_struct("RetryExceptions")
                .field("request", &request.identifier())
                .field("result_seed", result_seed)
                .field("retry_of", &target.result_seed)
                .finish(),
        }
    }
}

/// Runs jobs against a shared executor and result directory.
pub struct TaskRunner {
    executor: BulkExecutor,
    results: ResultStore,
}

impl TaskRunner {
    pub fn new(executor: BulkExecutor, results: ResultStore) -> Self {
        Self { executor, results }
    }

    pub fn executor(&self) -> &BulkExecutor {
        &self.executor
    }

    /// Config step. Returns the task already appended to `request`.
    pub async fn config_task(
        request: &Request,
        operation: OperationKind,
        target: TaskTarget,
        config: OperationConfig,
        state_capacity: usize,
    ) -> Result<SharedTask, TaskError> {
        config.validate()?;
        Generator::from_config(&config)?;

        let meta = request
            .metadata()
            .get_collection_metadata(&target.identifier, &config)
            .await;
        let (seed_start, seed_end, delta) = {
            let mut meta = meta.lock().await;
            let before = meta.seed_end;
            meta.cover(config.end);
            (
                meta.key(config.start),
                meta.key(config.end),
                meta.seed_end - before,
            )
        };
        request.add_to_seed_end(delta).await?;

        let result_seed = clock::next_seed();
        let task = Arc::new(Task::new(
            operation,
            result_seed,
            target,
            config,
            seed_start,
            seed_end,
            state_capacity,
        ));
        request.add_task(task.clone()).await?;
        info!(
            identifier = request.identifier(),
            result_seed,
            operation = %operation,
            seed_start,
            seed_end,
            "task configured"
        );
        Ok(task)
    }

    /// Runner sharing this one's permit pool, stopped by `cancel`.
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            executor: self.executor.with_cancel(cancel),
            results: self.results.clone(),
        }
    }

    /// Runs `job` under its own cancellation token.
    pub async fn execute(&self, job: Job) -> Result<TaskResult, TaskError> {
        let runner = self.scoped(job.cancel_token().clone());
        match job {
            Job::Run {
                request,
                task,
                client,
                ..
            } => runner.run(&request, &task, client).await,
            Job::RetryExceptions {
                request,
                target,
                exceptions,
                result_seed,
                client,
                ..
            } => {
                runner
                    .retry_exceptions(&request, &target, &exceptions, result_seed, client)
                    .await
            }
        }
    }

    async fn sweep_target(
        &self,
        request: &Request,
        task: &Task,
        client: Arc<dyn StoreClient>,
    ) -> Result<SweepTarget, TaskError> {
        let seed = request.metadata().lookup(task.identifier()).await?.lock().await.seed;
        let history = ReplayHistory::capture(&request.history().await, task.result_seed).await;
        Ok(SweepTarget {
            client,
            seed,
            history: Arc::new(history),
        })
    }

    /// Do and TearUp for a configured task.
    pub async fn run(
        &self,
        request: &Request,
        task: &SharedTask,
        client: Arc<dyn StoreClient>,
    ) -> Result<TaskResult, TaskError> {
        task.state.setup_storing_keys().await;
        let outcome = async {
            let target = self.sweep_target(request, task, client).await?;
            let sweep = self.executor.run(task, &target).await?;
            task.state.stop_storing_state().await;
            classify_failures(
                &self.executor,
                task,
                &target,
                &task.config.exceptions,
                sweep.cancelled,
            )
            .await?;
            Ok::<_, TaskError>(sweep.cancelled)
        }
        .await;

        let cancelled = match outcome {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!(result_seed = task.result_seed, error = %e, "task failed");
                task.state.stop_storing_state().await;
                return Err(e);
            }
        };
        self.tear_up(request, task, cancelled).await
    }

    async fn tear_up(
        &self,
        request: &Request,
        task: &Task,
        cancelled: bool,
    ) -> Result<TaskResult, TaskError> {
        task.state.stop_storing_state().await;
        // A cancelled sweep stays pending so it can be resumed.
        task.set_pending(cancelled);
        task.set_rerun(false);
        request.save().await?;

        let result = task.result.lock().await.clone();
        self.results.save(&result).await?;
        info!(
            result_seed = task.result_seed,
            success = result.success,
            failure = result.failure,
            cancelled,
            "task finished"
        );
        Ok(result)
    }

    /// Applies `exceptions` to the ledger of `target` and files the outcome
    /// under `result_seed`.
    pub async fn retry_exceptions(
        &self,
        request: &Request,
        target: &SharedTask,
        exceptions: &Exceptions,
        result_seed: i64,
        client: Arc<dyn StoreClient>,
    ) -> Result<TaskResult, TaskError> {
        if target.is_pending() {
            return Err(TaskError::StillPending {
                result_seed: target.result_seed,
            });
        }
        let sweep = self.sweep_target(request, target, client).await?;
        classify_failures(&self.executor, target, &sweep, exceptions, false).await?;
        request.save().await?;

        let mut result = target.result.lock().await.clone();
        result.seed = result_seed;
        result.retry_of = Some(target.result_seed);
        self.results.save(&result).await?;
        info!(
            result_seed,
            retry_of = target.result_seed,
            success = result.success,
            failure = result.failure,
            "exception retry finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{metrics::Metrics, snapshot::SnapshotStore, store::MemoryStore};
    use model::{ClusterConfig, CollectionId, CollectionIdentifier};
    use tokio_util::sync::CancellationToken;

    fn target(token: &str) -> TaskTarget {
        let cluster = ClusterConfig::new("mem://local");
        let collection = CollectionId::default_in("bucket");
        TaskTarget {
            identifier: CollectionIdentifier::new(token, &cluster, &collection),
            cluster,
            collection,
        }
    }

    fn runner(dir: &std::path::Path) -> TaskRunner {
        TaskRunner::new(
            BulkExecutor::new(8, CancellationToken::new(), Metrics::new()),
            ResultStore::new(dir.join("results")),
        )
    }

    #[tokio::test]
    async fn config_reserves_key_space() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::new("req", SnapshotStore::new(dir.path()));
        let first = TaskRunner::config_task(
            &request,
            OperationKind::Insert,
            target("req"),
            OperationConfig::new(0, 10),
            16,
        )
        .await
        .unwrap();
        let second = TaskRunner::config_task(
            &request,
            OperationKind::Insert,
            target("req"),
            OperationConfig::new(5, 25),
            16,
        )
        .await
        .unwrap();

        assert_eq!(second.state.seed_start - first.state.seed_start, 5);
        assert_eq!(second.state.seed_end - first.state.seed_start, 25);
        assert_eq!(request.history().await.len(), 2);
        assert!(second.result_seed > first.result_seed);
        assert_eq!(request.seed_end().await - request.seed().await, 25);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_history() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::new("req", SnapshotStore::new(dir.path()));
        let err = TaskRunner::config_task(
            &request,
            OperationKind::Insert,
            target("req"),
            OperationConfig::new(0, 10).with_template("nope"),
            16,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
        assert!(request.history().await.is_empty());
    }

    #[tokio::test]
    async fn run_persists_result_and_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::new("req", SnapshotStore::new(dir.path().join("requests")));
        let store = Arc::new(MemoryStore::new());
        let task = TaskRunner::config_task(
            &request,
            OperationKind::Insert,
            target("req"),
            OperationConfig::new(0, 12).with_doc_size(64),
            16,
        )
        .await
        .unwrap();

        let runner = runner(dir.path());
        let result = runner.run(&request, &task, store.clone()).await.unwrap();
        assert_eq!(result.success, 12);
        assert_eq!(result.failure, 0);
        assert!(!task.is_pending());
        assert_eq!(store.len().await, 12);

        let stored = ResultStore::new(dir.path().join("results"))
            .read(task.result_seed, false)
            .await
            .unwrap();
        assert_eq!(stored, Some(result));
    }

    #[tokio::test]
    async fn retry_exceptions_refiles_under_new_seed() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::new("req", SnapshotStore::new(dir.path().join("requests")));
        let store = Arc::new(MemoryStore::new());
        let task = TaskRunner::config_task(
            &request,
            OperationKind::Delete,
            target("req"),
            OperationConfig::new(0, 3),
            16,
        )
        .await
        .unwrap();
        let runner = runner(dir.path());
        let first = runner.run(&request, &task, store.clone()).await.unwrap();
        assert_eq!(first.failure, 3);

        let exceptions = Exceptions {
            ignore_exceptions: vec!["document not found".into()],
            ..Default::default()
        };
        let retry_seed = clock::next_seed();
        let retried = runner
            .retry_exceptions(&request, &task, &exceptions, retry_seed, store)
            .await
            .unwrap();
        assert_eq!(retried.seed, retry_seed);
        assert_eq!(retried.retry_of, Some(task.result_seed));
        assert_eq!(retried.failure, 0);
        assert_eq!(retried.success, 3);
    }
}
