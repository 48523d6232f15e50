use engine_core::error::{ConnectError, MetadataError, SnapshotError};
use engine_processing::error::ExecutorError;
use model::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures of one task's Config / Do / TearUp.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid operation config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("task {result_seed} is still running")]
    StillPending { result_seed: i64 },
}

/// Top-level errors of the workload engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("submission queue is full")]
    QueueFull,

    #[error("task manager is shut down")]
    ShutDown,

    #[error("no task {result_seed} in request {identifier}")]
    UnknownTask { identifier: String, result_seed: i64 },

    #[error("no submission tracked for result seed {0}")]
    UnknownSubmission(i64),

    #[error("task {0} was dropped before reporting")]
    Dropped(i64),
}
