use crate::{error::SnapshotError, snapshot::SnapshotStore};
use chrono::{DateTime, Utc};
use model::OperationKind;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};
use tracing::info;

/// Signature used to bucket failures: the rendered error text up to the
/// first `|`, trimmed.
pub fn exception_signature(text: &str) -> String {
    text.split('|').next().unwrap_or_default().trim().to_string()
}

/// One failed offset in the failure ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FailedDocument {
    pub offset: i64,
    pub doc_id: String,
    pub init_time: DateTime<Utc>,
    pub ack_time: DateTime<Utc>,
    pub status: bool,
    pub message: String,
}

/// Outcome of one offset re-executed by a retry pass.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetriedDocument {
    pub offset: i64,
    pub doc_id: String,
    pub success: bool,
    pub cas: Option<u64>,
    pub attempts: usize,
    pub init_time: DateTime<Utc>,
    pub ack_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub seed: i64,
    pub operation: OperationKind,
    pub success: i64,
    pub failure: i64,
    /// Signature → document ids.
    #[serde(default)]
    pub error: BTreeMap<String, Vec<String>>,
    /// Signature → failed offsets with timings.
    #[serde(default)]
    pub bulk_error: BTreeMap<String, Vec<FailedDocument>>,
    #[serde(default)]
    pub retried: Vec<RetriedDocument>,
    /// Result seed of the task a retry request reattached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<i64>,
}

impl TaskResult {
    pub fn new(seed: i64, operation: OperationKind) -> Self {
        Self {
            seed,
            operation,
            success: 0,
            failure: 0,
            error: BTreeMap::new(),
            bulk_error: BTreeMap::new(),
            retried: Vec::new(),
            retry_of: None,
        }
    }

    /// Files a failure under `signature`, replacing any earlier entry for the
    /// same offset.
    pub fn record_failure(&mut self, signature: &str, failed: FailedDocument) {
        self.remove_offset(failed.offset);
        self.error
            .entry(signature.to_string())
            .or_default()
            .push(failed.doc_id.clone());
        self.bulk_error
            .entry(signature.to_string())
            .or_default()
            .push(failed);
    }

    /// Drops every ledger entry for `offset`. Returns whether one existed.
    pub fn remove_offset(&mut self, offset: i64) -> bool {
        let mut removed = false;
        for (signature, docs) in self.bulk_error.iter_mut() {
            if let Some(pos) = docs.iter().position(|d| d.offset == offset) {
                let failed = docs.remove(pos);
                if let Some(ids) = self.error.get_mut(signature)
                    && let Some(id_pos) = ids.iter().position(|id| *id == failed.doc_id)
                {
                    ids.remove(id_pos);
                }
                removed = true;
            }
        }
        self.prune();
        removed
    }

    /// Removes a whole signature from the ledger, returning its entries.
    pub fn take_signature(&mut self, signature: &str) -> Vec<FailedDocument> {
        self.error.remove(signature);
        self.bulk_error.remove(signature).unwrap_or_default()
    }

    pub fn signatures(&self) -> Vec<String> {
        self.bulk_error.keys().cloned().collect()
    }

    pub fn failed_offsets(&self) -> BTreeSet<i64> {
        self.bulk_error
            .values()
            .flatten()
            .map(|d| d.offset)
            .collect()
    }

    pub fn failures_for(&self, signature: &str) -> &[FailedDocument] {
        self.bulk_error
            .get(signature)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Success = `total` − Failure.
    pub fn set_counts(&mut self, total: i64, failure: i64) {
        self.failure = failure;
        self.success = (total - failure).max(0);
    }

    fn prune(&mut self) {
        self.bulk_error.retain(|_, docs| !docs.is_empty());
        self.error.retain(|_, ids| !ids.is_empty());
    }
}

/// `<result_dir>/<result_seed>.json` files.
#[derive(Debug, Clone)]
pub struct ResultStore {
    files: SnapshotStore,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            files: SnapshotStore::new(dir),
        }
    }

    pub async fn save(&self, result: &TaskResult) -> Result<PathBuf, SnapshotError> {
        self.files.write(&result.seed.to_string(), result).await
    }

    /// Reads the result for `seed`. The file is deleted afterwards unless
    /// `retain` is set.
    pub async fn read(
        &self,
        seed: i64,
        retain: bool,
    ) -> Result<Option<TaskResult>, SnapshotError> {
        let name = seed.to_string();
        let result = self.files.read::<TaskResult>(&name).await?;
        if result.is_some() && !retain {
            self.files.remove(&name).await?;
            info!(result_seed = seed, "task result consumed");
        }
        Ok(result)
    }
}
