use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub mod memory;

pub use memory::MemoryStore;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    #[default]
    None,
    Majority,
    MajorityAndPersistActive,
    PersistToMajority,
}

/// How `mutate_in` treats the enclosing document.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreSemantic {
    /// Document must exist.
    #[default]
    Replace,
    /// Create the document when missing.
    Upsert,
    /// Document must not exist.
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub durability: Durability,
    pub timeout: Duration,
    pub cas: Option<u64>,
    pub expiry: Option<Duration>,
    pub semantic: StoreSemantic,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            durability: Durability::None,
            timeout: Duration::from_secs(10),
            cas: None,
            expiry: None,
            semantic: StoreSemantic::Replace,
        }
    }
}

impl StoreOptions {
    pub fn with_semantic(mut self, semantic: StoreSemantic) -> Self {
        self.semantic = semantic;
        self
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetResult {
    pub value: Value,
    pub cas: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationResult {
    pub cas: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutateInSpec {
    Insert { path: String, value: Value },
    Upsert { path: String, value: Value },
    Remove { path: String },
    Increment { path: String, delta: i64 },
}

impl MutateInSpec {
    pub fn path(&self) -> &str {
        match self {
            MutateInSpec::Insert { path, .. }
            | MutateInSpec::Upsert { path, .. }
            | MutateInSpec::Remove { path }
            | MutateInSpec::Increment { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupInResult {
    pub cas: u64,
    /// One entry per requested path, `None` when the path is absent.
    pub values: Vec<Option<Value>>,
}

/// Key-value store operations consumed by the engine.
///
/// Implementations own connections and wire protocol; the engine only looks
/// at results and typed errors.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn get(&self, key: &str, opts: &StoreOptions) -> Result<GetResult, StoreError>;

    async fn insert(
        &self,
        key: &str,
        value: Value,
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError>;

    async fn upsert(
        &self,
        key: &str,
        value: Value,
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError>;

    async fn remove(&self, key: &str, opts: &StoreOptions) -> Result<MutationResult, StoreError>;

    async fn touch(&self, key: &str, opts: &StoreOptions) -> Result<MutationResult, StoreError>;

    async fn mutate_in(
        &self,
        key: &str,
        specs: &[MutateInSpec],
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError>;

    async fn lookup_in(
        &self,
        key: &str,
        paths: &[String],
        opts: &StoreOptions,
    ) -> Result<LookupInResult, StoreError>;
}
