use async_trait::async_trait;
use engine_core::{
    error::StoreError,
    store::{
        GetResult, LookupInResult, MemoryStore, MutateInSpec, MutationResult, StoreClient,
        StoreOptions,
    },
};
use serde_json::Value;
use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tokio_util::sync::CancellationToken;

/// Store that rejects every call with a temporary failure.
#[derive(Debug, Default)]
pub struct AlwaysFailing {
    calls: AtomicUsize,
}

impl AlwaysFailing {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self, key: &str) -> StoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StoreError::TemporaryFailure {
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl StoreClient for AlwaysFailing {
    async fn get(&self, key: &str, _opts: &StoreOptions) -> Result<GetResult, StoreError> {
        Err(self.fail(key))
    }

    async fn insert(
        &self,
        key: &str,
        _value: Value,
        _opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        Err(self.fail(key))
    }

    async fn upsert(
        &self,
        key: &str,
        _value: Value,
        _opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        Err(self.fail(key))
    }

    async fn remove(&self, key: &str, _opts: &StoreOptions) -> Result<MutationResult, StoreError> {
        Err(self.fail(key))
    }

    async fn touch(&self, key: &str, _opts: &StoreOptions) -> Result<MutationResult, StoreError> {
        Err(self.fail(key))
    }

    async fn mutate_in(
        &self,
        key: &str,
        _specs: &[MutateInSpec],
        _opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        Err(self.fail(key))
    }

    async fn lookup_in(
        &self,
        key: &str,
        _paths: &[String],
        _opts: &StoreOptions,
    ) -> Result<LookupInResult, StoreError> {
        Err(self.fail(key))
    }
}

/// In-memory store that logs every insert key and can trip a cancellation
/// token once a number of inserts went through.
#[derive(Debug, Default)]
pub struct ObservedStore {
    inner: MemoryStore,
    inserted: Mutex<Vec<String>>,
    trip: Option<(usize, CancellationToken)>,
}

impl ObservedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelling_after(inserts: usize, token: CancellationToken) -> Self {
        Self {
            trip: Some((inserts, token)),
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn inserted(&self) -> Vec<String> {
        self.inserted
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StoreClient for ObservedStore {
    async fn get(&self, key: &str, opts: &StoreOptions) -> Result<GetResult, StoreError> {
        self.inner.get(key, opts).await
    }

    async fn insert(
        &self,
        key: &str,
        value: Value,
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        let seen = match self.inserted.lock() {
            Ok(mut keys) => {
                keys.push(key.to_string());
                keys.len()
            }
            Err(_) => 0,
        };
        if let Some((limit, token)) = &self.trip
            && seen >= *limit
        {
            token.cancel();
        }
        self.inner.insert(key, value, opts).await
    }

    async fn upsert(
        &self,
        key: &str,
        value: Value,
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        self.inner.upsert(key, value, opts).await
    }

    async fn remove(&self, key: &str, opts: &StoreOptions) -> Result<MutationResult, StoreError> {
        self.inner.remove(key, opts).await
    }

    async fn touch(&self, key: &str, opts: &StoreOptions) -> Result<MutationResult, StoreError> {
        self.inner.touch(key, opts).await
    }

    async fn mutate_in(
        &self,
        key: &str,
        specs: &[MutateInSpec],
        opts: &StoreOptions,
    ) -> Result<MutationResult, StoreError> {
        self.inner.mutate_in(key, specs, opts).await
    }

    async fn lookup_in(
        &self,
        key: &str,
        paths: &[String],
        opts: &StoreOptions,
    ) -> Result<LookupInResult, StoreError> {
        self.inner.lookup_in(key, paths, opts).await
    }
}
