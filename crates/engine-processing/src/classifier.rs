use crate::{
    error::ExecutorError,
    executor::{BulkExecutor, SweepTarget},
};
use engine_core::{result::RetriedDocument, task::Task};
use model::Exceptions;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyOutcome {
    pub ignored: usize,
    pub retried: usize,
    pub recovered: usize,
    pub success: i64,
    pub failure: i64,
}

/// Post-sweep pass over the failure ledger.
///
/// Offsets under an ignored signature are reclassified as Completed and
/// dropped from the ledger. Offsets under a retryable signature are run
/// again through the executor; recovered ones move to Completed, the rest
/// are re-filed under whatever signature they failed with this time. The
/// result counts are rebuilt from the state sets afterwards.
///
/// Ignore wins when a signature is listed both ways. Running the pass again
/// over an already classified ledger changes nothing.
pub async fn classify_failures(
    executor: &BulkExecutor,
    task: &Task,
    target: &SweepTarget,
    exceptions: &Exceptions,
    cancelled: bool,
) -> Result<ClassifyOutcome, ExecutorError> {
    task.state.setup_storing_keys().await;
    let reporter = task.state.reporter().await?;
    let mut outcome = ClassifyOutcome::default();

    let signatures = task.result.lock().await.signatures();
    for signature in signatures {
        if exceptions.is_ignored(&signature) {
            let ignored = task.result.lock().await.take_signature(&signature);
            debug!(
                result_seed = task.result_seed,
                signature = %signature,
                count = ignored.len(),
                "ignoring failures"
            );
            for failed in &ignored {
                reporter.completed(failed.offset).await?;
            }
            outcome.ignored += ignored.len();
            continue;
        }
        if !exceptions.is_retryable(&signature) {
            continue;
        }

        let offsets: Vec<i64> = task
            .result
            .lock()
            .await
            .failures_for(&signature)
            .iter()
            .map(|d| d.offset)
            .collect();
        if offsets.is_empty() {
            continue;
        }
        debug!(
            result_seed = task.result_seed,
            signature = %signature,
            count = offsets.len(),
            "retrying failures"
        );
        let reports = executor
            .retry_offsets(task, target, &offsets, exceptions)
            .await?;
        outcome.retried += reports.len();

        for report in reports {
            let retried = RetriedDocument {
                offset: report.offset,
                doc_id: report.doc_id.clone(),
                success: report.result.is_ok(),
                cas: report.result.as_ref().ok().copied(),
                attempts: report.attempts,
                init_time: report.init_time,
                ack_time: report.ack_time,
            };
            let recovered = {
                let mut result = task.result.lock().await;
                result.retried.push(retried);
                match (report.signature(), report.failed_document()) {
                    (Some(latest), Some(failed)) => {
                        result.record_failure(&latest, failed);
                        false
                    }
                    _ => {
                        result.remove_offset(report.offset);
                        true
                    }
                }
            };
            if recovered {
                outcome.recovered += 1;
                reporter.completed(report.offset).await?;
            }
        }
    }

    task.state.stop_storing_state().await;

    let sets = task.state.sets().await;
    let failure = sets.err.len() as i64;
    // A cancelled sweep only vouches for what it recorded.
    let total = if cancelled {
        sets.len() as i64
    } else {
        task.config.len()
    };
    {
        let mut result = task.result.lock().await;
        result.set_counts(total, failure);
        outcome.success = result.success;
        outcome.failure = result.failure;
    }

    info!(
        result_seed = task.result_seed,
        ignored = outcome.ignored,
        retried = outcome.retried,
        recovered = outcome.recovered,
        success = outcome.success,
        failure = outcome.failure,
        "failures classified"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{operation::tests::id, replay::ReplayHistory};
    use engine_core::{
        metrics::Metrics,
        store::{MemoryStore, StoreClient},
        task::TaskTarget,
    };
    use model::{ClusterConfig, CollectionId, OperationConfig, OperationKind};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn task(operation: OperationKind, config: OperationConfig) -> Task {
        let target = TaskTarget {
            identifier: id(),
            cluster: ClusterConfig::new("mem://local"),
            collection: CollectionId::default_in("b"),
        };
        let (start, end) = (config.start, config.end);
        Task::new(operation, 7, target, config, start, end, 64)
    }

    fn target(store: Arc<MemoryStore>) -> SweepTarget {
        let client: Arc<dyn StoreClient> = store;
        SweepTarget {
            client,
            seed: 0,
            history: Arc::new(ReplayHistory::default()),
        }
    }

    fn executor() -> BulkExecutor {
        BulkExecutor::new(4, CancellationToken::new(), Metrics::new())
    }

    /// Deletes against an empty store: every offset fails "document not found".
    async fn failed_delete(store: &Arc<MemoryStore>) -> Task {
        let task = task(OperationKind::Delete, OperationConfig::new(0, 6));
        executor().run(&task, &target(store.clone())).await.unwrap();
        task
    }

    #[tokio::test]
    async fn counts_without_policy() {
        let store = Arc::new(MemoryStore::new());
        let task = failed_delete(&store).await;
        let outcome = classify_failures(
            &executor(),
            &task,
            &target(store),
            &Exceptions::default(),
            false,
        )
        .await
        .unwrap();

        assert_eq!(outcome.failure, 6);
        assert_eq!(outcome.success, 0);
        assert_eq!(task.result.lock().await.failures_for("document not found").len(), 6);
    }

    #[tokio::test]
    async fn ignored_signature_moves_offsets_to_completed() {
        let store = Arc::new(MemoryStore::new());
        let task = failed_delete(&store).await;
        let exceptions = Exceptions {
            ignore_exceptions: vec!["document not found".into()],
            ..Default::default()
        };
        let outcome = classify_failures(&executor(), &task, &target(store.clone()), &exceptions, false)
            .await
            .unwrap();

        assert_eq!(outcome.ignored, 6);
        assert_eq!(outcome.failure, 0);
        assert_eq!(outcome.success, 6);
        assert!(task.state.return_err_offset().await.is_empty());
        assert!(task.result.lock().await.signatures().is_empty());

        let again = classify_failures(&executor(), &task, &target(store), &exceptions, false)
            .await
            .unwrap();
        assert_eq!(again.ignored, 0);
        assert_eq!(again.failure, 0);
        assert_eq!(again.success, 6);
    }

    #[tokio::test]
    async fn retry_recovers_after_store_heals() {
        let store = Arc::new(MemoryStore::new());
        let task = task(OperationKind::Read, OperationConfig::new(0, 4));
        executor().run(&task, &target(store.clone())).await.unwrap();
        task.state.stop_storing_state().await;
        assert_eq!(task.state.return_err_offset().await.len(), 4);

        store.put_raw("1", serde_json::json!({"a": 1})).await;
        store.put_raw("2", serde_json::json!({"a": 2})).await;
        let exceptions = Exceptions {
            retry_exceptions: vec!["document not found".into()],
            retry_attempts: 2,
            ..Default::default()
        };
        let outcome = classify_failures(&executor(), &task, &target(store), &exceptions, false)
            .await
            .unwrap();

        assert_eq!(outcome.retried, 4);
        assert_eq!(outcome.recovered, 2);
        assert_eq!(outcome.failure, 2);
        assert_eq!(outcome.success, 2);
        let result = task.result.lock().await;
        assert_eq!(result.retried.len(), 4);
        assert_eq!(
            result.failed_offsets().into_iter().collect::<Vec<_>>(),
            vec![0, 3]
        );
    }

    #[tokio::test]
    async fn cancelled_run_counts_completed_only() {
        let store = Arc::new(MemoryStore::new());
        let task = task(OperationKind::Insert, OperationConfig::new(0, 10).with_doc_size(32));
        let reporter = task.state.reporter().await.unwrap();
        for offset in 0..3 {
            reporter.completed(offset).await.unwrap();
        }
        reporter.err(3).await.unwrap();

        let outcome = classify_failures(&executor(), &task, &target(store), &Exceptions::default(), true)
            .await
            .unwrap();
        assert_eq!(outcome.success, 3);
        assert_eq!(outcome.failure, 1);
    }
}
