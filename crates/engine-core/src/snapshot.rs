use crate::{clock, error::SnapshotError};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

/// Directory of `<name>.json` files written atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn io_err(path: &Path, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(name)))
    }

    pub async fn write<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, SnapshotError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| SnapshotError::Encode {
            name: name.to_string(),
            source,
        })?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, e))?;

        let path = self.path_for(name);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", sanitize(name), clock::next_seed()));
        fs::write(&tmp, &bytes).await.map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| io_err(&path, e))?;

        debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
        Ok(path)
    }

    /// `None` when no snapshot exists under `name`.
    pub async fn read<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, SnapshotError> {
        let path = self.path_for(name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SnapshotError::Decode {
                path: path.display().to_string(),
                source,
            })
    }

    /// Returns whether a file was removed.
    pub async fn remove(&self, name: &str) -> Result<bool, SnapshotError> {
        let path = self.path_for(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}
