use crate::{
    error::{EngineError, TaskError},
    manager::{JobOutcome, TaskManager},
    settings::EngineSettings,
    task::{Job, TaskRunner},
};
use async_trait::async_trait;
use engine_core::{
    clock,
    error::ConnectError,
    metrics::{Metrics, MetricsSnapshot},
    request::{Request, RequestRegistry},
    result::{ResultStore, TaskResult},
    snapshot::SnapshotStore,
    store::StoreClient,
    task::{SharedTask, TaskTarget},
};
use engine_processing::executor::BulkExecutor;
use model::{
    ClusterConfig, CollectionId, CollectionIdentifier, Exceptions, OperationConfig, OperationKind,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Resolves the store client for a cluster and collection.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    async fn resolve(
        &self,
        cluster: &ClusterConfig,
        collection: &CollectionId,
    ) -> Result<Arc<dyn StoreClient>, ConnectError>;
}

/// Hands out one client for every target.
pub struct SharedClientProvider {
    client: Arc<dyn StoreClient>,
}

impl SharedClientProvider {
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClientProvider for SharedClientProvider {
    async fn resolve(
        &self,
        _cluster: &ClusterConfig,
        _collection: &CollectionId,
    ) -> Result<Arc<dyn StoreClient>, ConnectError> {
        Ok(self.client.clone())
    }
}

/// Submission surface of the engine.
pub struct WorkloadService {
    settings: EngineSettings,
    requests: RequestRegistry,
    results: ResultStore,
    manager: TaskManager,
    provider: Arc<dyn ClientProvider>,
    cancel: CancellationToken,
    /// Parent of every job queued since the last `cancel()`.
    generation: std::sync::Mutex<CancellationToken>,
    metrics: Metrics,
    outcomes: Mutex<HashMap<i64, oneshot::Receiver<JobOutcome>>>,
}

impl WorkloadService {
    pub fn new(
        settings: EngineSettings,
        provider: Arc<dyn ClientProvider>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;

        let cancel = CancellationToken::new();
        let metrics = Metrics::new();
        let executor = BulkExecutor::new(settings.max_concurrency, cancel.clone(), metrics.clone())
            .with_retry_delay(settings.retry_base_delay(), settings.retry_max_delay());
        let results = ResultStore::new(&settings.result_dir);
        let runner = Arc::new(TaskRunner::new(executor, results.clone()));

        info!(
            snapshot_dir = %settings.snapshot_dir.display(),
            result_dir = %settings.result_dir.display(),
            max_concurrency = settings.max_concurrency,
            "workload service started"
        );
        Ok(Self {
            requests: RequestRegistry::new(
                SnapshotStore::new(&settings.snapshot_dir),
                settings.state_channel_capacity,
            ),
            manager: TaskManager::new(runner, settings.queue_capacity),
            results,
            provider,
            generation: std::sync::Mutex::new(cancel.child_token()),
            cancel,
            metrics,
            outcomes: Mutex::new(HashMap::new()),
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Request for `identifier`, reloaded from its snapshot when needed.
    pub async fn request(&self, identifier: &str) -> Result<Arc<Request>, EngineError> {
        Ok(self.requests.get_or_create(identifier).await?)
    }

    /// Configures a task and queues it. Returns its ResultSeed.
    pub async fn submit(
        &self,
        identifier: &str,
        operation: OperationKind,
        cluster: ClusterConfig,
        collection: CollectionId,
        config: OperationConfig,
    ) -> Result<i64, EngineError> {
        let request = self.request(identifier).await?;
        let client = self.resolve(&cluster, &collection).await?;
        let target = TaskTarget {
            identifier: CollectionIdentifier::new(identifier, &cluster, &collection),
            cluster,
            collection,
        };
        let task = TaskRunner::config_task(
            &request,
            operation,
            target,
            config,
            self.settings.state_channel_capacity,
        )
        .await?;
        let result_seed = task.result_seed;
        self.enqueue(Job::Run {
            request,
            task,
            client,
            cancel: self.job_token(),
        })
        .await?;
        Ok(result_seed)
    }

    /// Reattaches to the task `result_seed` and reclassifies its failures
    /// under `exceptions`. Returns the retry's own ResultSeed.
    pub async fn retry_exceptions(
        &self,
        identifier: &str,
        result_seed: i64,
        exceptions: Exceptions,
    ) -> Result<i64, EngineError> {
        let request = self.request(identifier).await?;
        let target = self.find_task(&request, result_seed).await?;
        let client = self
            .resolve(&target.target.cluster, &target.target.collection)
            .await?;
        let retry_seed = clock::next_seed();
        self.enqueue(Job::RetryExceptions {
            request,
            target,
            exceptions,
            result_seed: retry_seed,
            client,
            cancel: self.job_token(),
        })
        .await?;
        Ok(retry_seed)
    }

    /// Reruns every task of `identifier` whose pending flag survived, skipping
    /// offsets already recorded in its state.
    pub async fn resume_pending(&self, identifier: &str) -> Result<Vec<i64>, EngineError> {
        let request = self.request(identifier).await?;
        let mut seeds = Vec::new();
        for task in request.pending_tasks().await {
            let client = self
                .resolve(&task.target.cluster, &task.target.collection)
                .await?;
            task.set_rerun(true);
            seeds.push(task.result_seed);
            info!(
                identifier,
                result_seed = task.result_seed,
                operation = %task.operation,
                "resuming pending task"
            );
            self.enqueue(Job::Run {
                request: request.clone(),
                task,
                client,
                cancel: self.job_token(),
            })
            .await?;
        }
        Ok(seeds)
    }

    /// Persisted result for `result_seed`; consumed unless retained here or
    /// in the settings.
    pub async fn task_result(
        &self,
        result_seed: i64,
        retain: bool,
    ) -> Result<Option<TaskResult>, EngineError> {
        let retain = retain || self.settings.retain_results;
        Ok(self.results.read(result_seed, retain).await?)
    }

    /// Waits for a job queued by this service and returns its outcome.
    pub async fn wait(&self, result_seed: i64) -> Result<TaskResult, EngineError> {
        let outcome = self
            .outcomes
            .lock()
            .await
            .remove(&result_seed)
            .ok_or(EngineError::UnknownSubmission(result_seed))?;
        let result = outcome
            .await
            .map_err(|_| EngineError::Dropped(result_seed))?;
        Ok(result?)
    }

    /// Stops submitting new offsets in every sweep queued so far. Sweeps
    /// drain and their tasks stay pending; later submissions and
    /// `resume_pending` run normally.
    pub fn cancel(&self) {
        let mut generation = match self.generation.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        generation.cancel();
        *generation = self.cancel.child_token();
        info!("queued sweeps cancelled");
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        info!("workload service stopped");
    }

    async fn resolve(
        &self,
        cluster: &ClusterConfig,
        collection: &CollectionId,
    ) -> Result<Arc<dyn StoreClient>, EngineError> {
        self.provider
            .resolve(cluster, collection)
            .await
            .map_err(|e| EngineError::Task(TaskError::Connect(e)))
    }

    async fn find_task(&self, request: &Request, result_seed: i64) -> Result<SharedTask, EngineError> {
        request
            .find_task(result_seed)
            .await
            .ok_or_else(|| EngineError::UnknownTask {
                identifier: request.identifier().to_string(),
                result_seed,
            })
    }

    fn job_token(&self) -> CancellationToken {
        match self.generation.lock() {
            Ok(generation) => generation.child_token(),
            Err(poisoned) => poisoned.into_inner().child_token(),
        }
    }

    async fn enqueue(&self, job: Job) -> Result<(), EngineError> {
        let result_seed = job.result_seed();
        let outcome = self.manager.submit(job)?;
        self.outcomes.lock().await.insert(result_seed, outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::store::MemoryStore;

    struct Unreachable;

    #[async_trait]
    impl ClientProvider for Unreachable {
        async fn resolve(
            &self,
            cluster: &ClusterConfig,
            _collection: &CollectionId,
        ) -> Result<Arc<dyn StoreClient>, ConnectError> {
            Err(ConnectError {
                target: cluster.connection_str.clone(),
                reason: "connection refused".into(),
            })
        }
    }

    fn service(dir: &std::path::Path, provider: Arc<dyn ClientProvider>) -> WorkloadService {
        let settings = EngineSettings {
            max_concurrency: 8,
            ..EngineSettings::in_dir(dir)
        };
        WorkloadService::new(settings, provider).unwrap()
    }

    #[tokio::test]
    async fn submit_then_read_result_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let svc = service(dir.path(), Arc::new(SharedClientProvider::new(store.clone())));

        let seed = svc
            .submit(
                "req",
                OperationKind::Insert,
                ClusterConfig::new("mem://local"),
                CollectionId::default_in("bucket"),
                OperationConfig::new(0, 8).with_doc_size(64),
            )
            .await
            .unwrap();
        let result = svc.wait(seed).await.unwrap();
        assert_eq!(result.success, 8);
        assert_eq!(store.len().await, 8);

        assert_eq!(svc.task_result(seed, false).await.unwrap(), Some(result));
        assert_eq!(svc.task_result(seed, false).await.unwrap(), None);
        assert_eq!(svc.metrics().offsets_processed, 8);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn submissions_after_cancel_still_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let svc = service(dir.path(), Arc::new(SharedClientProvider::new(store.clone())));
        svc.cancel();

        let seed = svc
            .submit(
                "req",
                OperationKind::Insert,
                ClusterConfig::new("mem://local"),
                CollectionId::default_in("bucket"),
                OperationConfig::new(0, 8).with_doc_size(64),
            )
            .await
            .unwrap();
        let result = svc.wait(seed).await.unwrap();
        assert_eq!((result.success, result.failure), (8, 0));
        assert_eq!(store.len().await, 8);
        assert!(svc.request("req").await.unwrap().pending_tasks().await.is_empty());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn connectivity_failure_aborts_submission() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(Unreachable));
        let err = svc
            .submit(
                "req",
                OperationKind::Insert,
                ClusterConfig::new("mem://down"),
                CollectionId::default_in("bucket"),
                OperationConfig::new(0, 8),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Task(TaskError::Connect(_))));
        assert!(svc.request("req").await.unwrap().history().await.is_empty());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn retry_of_unknown_task_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let svc = service(dir.path(), Arc::new(SharedClientProvider::new(store)));
        let err = svc
            .retry_exceptions("req", 42, Exceptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTask { result_seed: 42, .. }));
        svc.shutdown().await;
    }
}
