use thiserror::Error;

/// Typed failures reported by a store client.
///
/// The rendered text is `<kind> | <context>`; everything before the first `|`
/// is the exception signature used to bucket failures for retry and ignore
/// policies, so the leading segment must stay stable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found | key={key}")]
    DocumentNotFound { key: String },

    #[error("document exists | key={key}")]
    DocumentExists { key: String },

    #[error("path not found | key={key} path={path}")]
    PathNotFound { key: String, path: String },

    #[error("path exists | key={key} path={path}")]
    PathExists { key: String, path: String },

    #[error("cas mismatch | key={key}")]
    CasMismatch { key: String },

    #[error("unambiguous timeout | key={key}")]
    Timeout { key: String },

    #[error("temporary failure | key={key}")]
    TemporaryFailure { key: String },

    #[error("durability impossible | key={key}")]
    DurabilityImpossible { key: String },

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::DocumentNotFound { .. })
    }

    /// Document or path already there.
    pub fn is_already_present(&self) -> bool {
        matches!(
            self,
            StoreError::DocumentExists { .. } | StoreError::PathExists { .. }
        )
    }

    /// Document or path missing.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            StoreError::DocumentNotFound { .. } | StoreError::PathNotFound { .. }
        )
    }

    /// Errors that may clear up on another attempt. Replies describing the
    /// document's state come back the same every time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout { .. }
                | StoreError::TemporaryFailure { .. }
                | StoreError::CasMismatch { .. }
                | StoreError::DurabilityImpossible { .. }
                | StoreError::Other(_)
        )
    }
}

/// Cluster or bucket could not be reached within its readiness retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cluster unreachable: {target}: {reason}")]
pub struct ConnectError {
    pub target: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("task state ingestion is stopped")]
    IngestionStopped,

    #[error("failed to report offset {offset}: {reason}")]
    Report { offset: i64, reason: String },
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode snapshot {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode snapshot {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("no metadata recorded for collection {0}")]
    UnknownCollection(String),
}

/// Common error type for all actors in the engine.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Mailbox closed")]
    MailboxClosed,

    #[error("Mailbox full")]
    MailboxFull,
}
