use crate::{
    error::{ExecutorError, OffsetError},
    operation::{OffsetContext, OperationStrategy, strategy_for},
    replay::ReplayHistory,
    retry::classify_offset_error,
};
use chrono::{DateTime, Utc};
use engine_core::{
    metrics::Metrics,
    result::{FailedDocument, exception_signature},
    retry::RetryPolicy,
    state::StateReporter,
    store::StoreClient,
    task::Task,
};
use generator::Generator;
use model::Exceptions;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 128;

/// Outcome of one offset, with the timings that go into the ledger.
#[derive(Debug, Clone)]
pub struct OffsetReport {
    pub offset: i64,
    pub doc_id: String,
    pub init_time: DateTime<Utc>,
    pub ack_time: DateTime<Utc>,
    pub attempts: usize,
    pub result: Result<u64, OffsetError>,
}

impl OffsetReport {
    pub fn signature(&self) -> Option<String> {
        self.result
            .as_ref()
            .err()
            .map(|e| exception_signature(&e.to_string()))
    }

    pub fn failed_document(&self) -> Option<FailedDocument> {
        let err = self.result.as_ref().err()?;
        Some(FailedDocument {
            offset: self.offset,
            doc_id: self.doc_id.clone(),
            init_time: self.init_time,
            ack_time: self.ack_time,
            status: false,
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub submitted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: bool,
}

/// Inputs a sweep needs beyond the task itself.
#[derive(Clone)]
pub struct SweepTarget {
    pub client: Arc<dyn StoreClient>,
    /// Collection seed the task's offsets are relative to.
    pub seed: i64,
    pub history: Arc<ReplayHistory>,
}

/// Bounded-concurrency sweep over a task's offset range.
///
/// One permit per in-flight offset; a worker holds it for the store call
/// and the state report. The cancellation token is checked before every
/// submission; on trip the sweep stops submitting and drains what is in
/// flight.
#[derive(Clone)]
pub struct BulkExecutor {
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    metrics: Metrics,
    base_delay: Duration,
    max_delay: Duration,
}

impl BulkExecutor {
    pub fn new(max_concurrency: usize, cancel: CancellationToken, metrics: Metrics) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            cancel,
            metrics,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay between attempts of one offset. Zero keeps attempts immediate.
    pub fn with_retry_delay(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Same permit pool and delays, stopped by `cancel` instead.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn policy(&self, exceptions: &Exceptions) -> RetryPolicy {
        RetryPolicy::from_exceptions(exceptions, self.base_delay, self.max_delay)
    }

    pub fn context(&self, task: &Task, target: &SweepTarget) -> Result<Arc<OffsetContext>, ExecutorError> {
        Ok(Arc::new(OffsetContext {
            client: target.client.clone(),
            generator: Generator::from_config(&task.config)?,
            history: target.history.clone(),
            identifier: task.identifier().clone(),
            config: task.config.clone(),
            seed: target.seed,
            options: OffsetContext::store_options(&task.config),
        }))
    }

    /// Runs every offset of `task` not already recorded in its state.
    ///
    /// Outcomes are reported through the task's state ingestion, which must
    /// be running. Failures are filed in the task's ledger by signature.
    pub async fn run(&self, task: &Task, target: &SweepTarget) -> Result<SweepOutcome, ExecutorError> {
        let strategy = strategy_for(task.operation);
        let ctx = self.context(task, target)?;
        let policy = Arc::new(self.policy(&task.config.exceptions));
        let recorded = task.state.recorded_offsets().await;
        let reporter = task.state.reporter().await?;
        let rerun = task.is_rerun();

        info!(
            result_seed = task.result_seed,
            operation = %task.operation,
            start = task.config.start,
            end = task.config.end,
            recorded = recorded.len(),
            rerun,
            "sweep started"
        );

        let mut outcome = SweepOutcome::default();
        let mut workers = JoinSet::new();

        for offset in task.config.start..task.config.end {
            if recorded.contains(&offset) {
                outcome.skipped += 1;
                continue;
            }
            let Some(permit) = self.acquire().await else {
                outcome.cancelled = true;
                break;
            };

            outcome.submitted += 1;
            let strategy = strategy.clone();
            let ctx = ctx.clone();
            let policy = policy.clone();
            let reporter = reporter.clone();
            workers.spawn(async move {
                let _permit = permit;
                let report = execute_offset(strategy.as_ref(), &ctx, offset, &policy, rerun).await;
                report_state(&reporter, &report).await;
                report
            });

            while let Some(done) = workers.try_join_next() {
                self.record(task, done, &mut outcome).await;
            }
        }

        while let Some(done) = workers.join_next().await {
            self.record(task, done, &mut outcome).await;
        }

        self.metrics.increment_skipped(outcome.skipped);
        if outcome.cancelled {
            warn!(
                result_seed = task.result_seed,
                submitted = outcome.submitted,
                "sweep cancelled, in-flight offsets drained"
            );
        } else {
            info!(
                result_seed = task.result_seed,
                submitted = outcome.submitted,
                skipped = outcome.skipped,
                failed = outcome.failed,
                "sweep finished"
            );
        }
        Ok(outcome)
    }

    /// Re-executes `offsets` of `task` under `exceptions`' attempt budget.
    /// "Already applied" replies count as success.
    pub async fn retry_offsets(
        &self,
        task: &Task,
        target: &SweepTarget,
        offsets: &[i64],
        exceptions: &Exceptions,
    ) -> Result<Vec<OffsetReport>, ExecutorError> {
        let strategy = strategy_for(task.operation);
        let ctx = self.context(task, target)?;
        let policy = Arc::new(self.policy(exceptions));

        let mut workers = JoinSet::new();
        for &offset in offsets {
            let Some(permit) = self.acquire().await else {
                break;
            };
            let strategy = strategy.clone();
            let ctx = ctx.clone();
            let policy = policy.clone();
            workers.spawn(async move {
                let _permit = permit;
                execute_offset(strategy.as_ref(), &ctx, offset, &policy, true).await
            });
        }

        let mut reports = Vec::with_capacity(offsets.len());
        while let Some(done) = workers.join_next().await {
            match done {
                Ok(report) => {
                    self.metrics
                        .increment_retries(report.attempts.max(1) as u64);
                    reports.push(report);
                }
                Err(e) => error!(result_seed = task.result_seed, error = %e, "retry worker failed"),
            }
        }
        reports.sort_by_key(|r| r.offset);
        Ok(reports)
    }

    /// `None` once cancellation has been requested.
    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok()?,
        };
        // A worker may have tripped the token while we waited.
        (!self.cancel.is_cancelled()).then_some(permit)
    }

    async fn record(
        &self,
        task: &Task,
        done: Result<OffsetReport, JoinError>,
        outcome: &mut SweepOutcome,
    ) {
        let report = match done {
            Ok(report) => report,
            Err(e) => {
                error!(result_seed = task.result_seed, error = %e, "sweep worker failed");
                return;
            }
        };

        self.metrics.increment_processed(1);
        if report.attempts > 1 {
            self.metrics.increment_retries(report.attempts as u64 - 1);
        }

        let (Some(signature), Some(failed)) = (report.signature(), report.failed_document()) else {
            return;
        };
        outcome.failed += 1;
        self.metrics.increment_failures(1);
        if matches!(report.result, Err(OffsetError::Integrity { .. })) {
            self.metrics.increment_integrity_failures(1);
        }
        warn!(
            result_seed = task.result_seed,
            offset = report.offset,
            signature = %signature,
            "offset failed"
        );
        task.result.lock().await.record_failure(&signature, failed);
    }
}

/// Runs one offset under the retry policy and stamps InitTime/AckTime.
pub async fn execute_offset(
    strategy: &dyn OperationStrategy,
    ctx: &OffsetContext,
    offset: i64,
    policy: &RetryPolicy,
    accept_applied: bool,
) -> OffsetReport {
    let doc_id = ctx.doc_id(offset);
    let init_time = Utc::now();
    let (result, attempts) = policy
        .run_counted(|| strategy.apply(ctx, offset), classify_offset_error)
        .await;
    let ack_time = Utc::now();

    let result = match result {
        Ok(cas) => Ok(cas),
        Err(e) => {
            let err = e.into_inner();
            if accept_applied && strategy.already_applied(&err) {
                debug!(offset, doc_id = %doc_id, error = %err, "already applied");
                Ok(0)
            } else {
                Err(err)
            }
        }
    };

    OffsetReport {
        offset,
        doc_id,
        init_time,
        ack_time,
        attempts,
        result,
    }
}

async fn report_state(reporter: &StateReporter, report: &OffsetReport) {
    let sent = match report.result {
        Ok(_) => reporter.completed(report.offset).await,
        Err(_) => reporter.err(report.offset).await,
    };
    if let Err(e) = sent {
        warn!(offset = report.offset, error = %e, "state report dropped");
    }
}
