use crate::error::SettingsError;
use engine_core::state::DEFAULT_STATE_CHANNEL_CAPACITY;
use engine_processing::executor::DEFAULT_MAX_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".workload")
}

fn default_snapshot_dir() -> PathBuf {
    base_dir().join("requests")
}

fn default_result_dir() -> PathBuf {
    base_dir().join("results")
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_state_channel_capacity() -> usize {
    DEFAULT_STATE_CHANNEL_CAPACITY
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
    /// In-flight store calls per sweep.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Submissions the task manager buffers before rejecting.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_state_channel_capacity")]
    pub state_channel_capacity: usize,
    #[serde(default)]
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub retry_max_delay_ms: u64,
    /// Keep result files after they are read.
    #[serde(default)]
    pub retain_results: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
            result_dir: default_result_dir(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            state_channel_capacity: DEFAULT_STATE_CHANNEL_CAPACITY,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            retain_results: false,
        }
    }
}

impl EngineSettings {
    /// Defaults with both snapshot and result files under `root`.
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            snapshot_dir: root.join("requests"),
            result_dir: root.join("results"),
            ..Self::default()
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let settings: Self =
            serde_json::from_slice(&raw).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let capacities = [
            ("max_concurrency", self.max_concurrency),
            ("queue_capacity", self.queue_capacity),
            ("state_channel_capacity", self.state_channel_capacity),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.retry_max_delay_ms != 0 && self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(SettingsError::Invalid {
                field: "retry_max_delay_ms",
                reason: format!(
                    "{} is below retry_base_delay_ms {}",
                    self.retry_max_delay_ms, self.retry_base_delay_ms
                ),
            });
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Installs a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`. Returns false when a global subscriber already exists.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = EngineSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.max_concurrency, 128);
        assert!(settings.snapshot_dir.ends_with(".workload/requests"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let settings = EngineSettings {
            queue_capacity: 0,
            ..EngineSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "queue_capacity",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn loads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        tokio::fs::write(&path, r#"{"max_concurrency": 4, "retain_results": true}"#)
            .await
            .unwrap();

        let settings = EngineSettings::load(&path).await.unwrap();
        assert_eq!(settings.max_concurrency, 4);
        assert!(settings.retain_results);
        assert_eq!(settings.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineSettings::load(dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
