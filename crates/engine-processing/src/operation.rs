use crate::{error::OffsetError, replay::ReplayHistory, validate::ValidateOp};
use async_trait::async_trait;
use engine_core::{
    error::StoreError,
    store::{MutateInSpec, StoreClient, StoreOptions},
};
use generator::{Generator, apply_sub_document};
use model::{CollectionIdentifier, OperationConfig, OperationKind};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};

/// Per-document counter bumped by every sub-document mutation.
pub const MUTATION_COUNTER: &str = "_mutated";

/// Everything a strategy needs to act on one offset of a sweep.
pub struct OffsetContext {
    pub client: Arc<dyn StoreClient>,
    pub generator: Generator,
    pub history: Arc<ReplayHistory>,
    pub identifier: CollectionIdentifier,
    pub config: OperationConfig,
    /// Collection seed; the numeric key of an offset is `seed + offset`.
    pub seed: i64,
    pub options: StoreOptions,
}

impl OffsetContext {
    pub fn key(&self, offset: i64) -> i64 {
        self.seed + offset
    }

    pub fn doc_id(&self, offset: i64) -> String {
        self.generator.build_key(self.key(offset))
    }

    pub fn store_options(config: &OperationConfig) -> StoreOptions {
        let options = StoreOptions::default();
        if config.expiry > 0 {
            options.with_expiry(Duration::from_secs(config.expiry))
        } else {
            options
        }
    }

    /// Replayed sub-document paths plus the mutation counter, as they should
    /// be carried over by a full-document write.
    fn carry_over_sub_document(&self, offset: i64, doc: &mut Value) {
        let key = self.key(offset);
        if let Some(sub) = self
            .history
            .expected_sub_document(&self.identifier, offset, key)
        {
            apply_sub_document(doc, &sub);
        }
        let count = self.history.count_mutation(&self.identifier, offset);
        if count > 0
            && let Some(map) = doc.as_object_mut()
        {
            map.insert(MUTATION_COUNTER.to_string(), json!(count));
        }
    }
}

/// How one operation kind acts on a single offset.
///
/// `apply` returns the CAS of the write, or zero for reads.
#[async_trait]
pub trait OperationStrategy: Send + Sync {
    fn kind(&self) -> OperationKind;

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError>;

    /// Whether `err` means an earlier attempt of this operation already
    /// landed. Only consulted for reruns and retry passes.
    fn already_applied(&self, err: &OffsetError) -> bool {
        let kind = self.kind();
        err.as_store().is_some_and(|e| {
            (kind.exists_means_applied() && e.is_already_present())
                || (kind.not_found_means_applied() && e.is_absent())
        })
    }
}

pub fn strategy_for(kind: OperationKind) -> Arc<dyn OperationStrategy> {
    match kind {
        OperationKind::Insert => Arc::new(InsertOp),
        OperationKind::Upsert => Arc::new(UpsertOp),
        OperationKind::Delete => Arc::new(DeleteOp),
        OperationKind::Touch => Arc::new(TouchOp),
        OperationKind::Read => Arc::new(ReadOp),
        OperationKind::Validate => Arc::new(ValidateOp),
        OperationKind::SubDocInsert => Arc::new(SubDocInsertOp),
        OperationKind::SubDocUpsert => Arc::new(SubDocUpsertOp),
        OperationKind::SubDocDelete => Arc::new(SubDocDeleteOp),
        OperationKind::SubDocRead => Arc::new(SubDocReadOp),
    }
}

pub struct InsertOp;

#[async_trait]
impl OperationStrategy for InsertOp {
    fn kind(&self) -> OperationKind {
        OperationKind::Insert
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let doc = ctx.generator.generate_document(ctx.key(offset));
        let res = ctx
            .client
            .insert(&ctx.doc_id(offset), doc, &ctx.options)
            .await?;
        Ok(res.cas)
    }
}

/// Full-document write of the replayed content plus one new mutation.
pub struct UpsertOp;

#[async_trait]
impl OperationStrategy for UpsertOp {
    fn kind(&self) -> OperationKind {
        OperationKind::Upsert
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let template = ctx.generator.template();
        let (mut doc, mut stream) = ctx.history.retrace_document(
            &ctx.identifier,
            offset,
            ctx.key(offset),
            template,
            ctx.generator.doc_size(),
        );
        stream.mutate(template, &mut doc, &ctx.config.fields_to_change);
        ctx.carry_over_sub_document(offset, &mut doc);

        let res = ctx
            .client
            .upsert(&ctx.doc_id(offset), doc, &ctx.options)
            .await?;
        Ok(res.cas)
    }
}

pub struct DeleteOp;

#[async_trait]
impl OperationStrategy for DeleteOp {
    fn kind(&self) -> OperationKind {
        OperationKind::Delete
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let res = ctx.client.remove(&ctx.doc_id(offset), &ctx.options).await?;
        Ok(res.cas)
    }
}

pub struct TouchOp;

#[async_trait]
impl OperationStrategy for TouchOp {
    fn kind(&self) -> OperationKind {
        OperationKind::Touch
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let res = ctx.client.touch(&ctx.doc_id(offset), &ctx.options).await?;
        Ok(res.cas)
    }
}

pub struct ReadOp;

#[async_trait]
impl OperationStrategy for ReadOp {
    fn kind(&self) -> OperationKind {
        OperationKind::Read
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let res = ctx.client.get(&ctx.doc_id(offset), &ctx.options).await?;
        Ok(res.cas)
    }
}

fn counter_bump() -> MutateInSpec {
    MutateInSpec::Increment {
        path: MUTATION_COUNTER.to_string(),
        delta: 1,
    }
}

/// Inserts a freshly generated sub-document.
pub struct SubDocInsertOp;

#[async_trait]
impl OperationStrategy for SubDocInsertOp {
    fn kind(&self) -> OperationKind {
        OperationKind::SubDocInsert
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let sub = ctx.generator.generate_sub_path_and_value(ctx.key(offset));
        let mut specs: Vec<MutateInSpec> = sub
            .into_iter()
            .map(|(path, value)| MutateInSpec::Insert { path, value })
            .collect();
        specs.push(counter_bump());

        let res = ctx
            .client
            .mutate_in(&ctx.doc_id(offset), &specs, &ctx.options)
            .await?;
        Ok(res.cas)
    }
}

/// Rewrites every sub-document path with the replayed state plus one new
/// mutation.
pub struct SubDocUpsertOp;

#[async_trait]
impl OperationStrategy for SubDocUpsertOp {
    fn kind(&self) -> OperationKind {
        OperationKind::SubDocUpsert
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let mut state = ctx.history.retrace_sub_document(
            &ctx.identifier,
            offset,
            ctx.key(offset),
            ctx.generator.doc_size(),
        );
        state
            .stream
            .mutate_sub_document(&mut state.paths, &ctx.config.fields_to_change);

        let mut specs: Vec<MutateInSpec> = state
            .paths
            .into_iter()
            .map(|(path, value)| MutateInSpec::Upsert { path, value })
            .collect();
        specs.push(counter_bump());

        let res = ctx
            .client
            .mutate_in(&ctx.doc_id(offset), &specs, &ctx.options)
            .await?;
        Ok(res.cas)
    }
}

pub struct SubDocDeleteOp;

#[async_trait]
impl OperationStrategy for SubDocDeleteOp {
    fn kind(&self) -> OperationKind {
        OperationKind::SubDocDelete
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let sub = ctx.generator.generate_sub_path_and_value(ctx.key(offset));
        let mut specs: Vec<MutateInSpec> = sub
            .into_keys()
            .map(|path| MutateInSpec::Remove { path })
            .collect();
        specs.push(counter_bump());

        let res = ctx
            .client
            .mutate_in(&ctx.doc_id(offset), &specs, &ctx.options)
            .await?;
        Ok(res.cas)
    }
}

pub struct SubDocReadOp;

#[async_trait]
impl OperationStrategy for SubDocReadOp {
    fn kind(&self) -> OperationKind {
        OperationKind::SubDocRead
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let doc_id = ctx.doc_id(offset);
        let paths: Vec<String> = ctx
            .generator
            .generate_sub_path_and_value(ctx.key(offset))
            .into_keys()
            .collect();

        let res = ctx.client.lookup_in(&doc_id, &paths, &ctx.options).await?;
        if let Some(missing) = paths
            .iter()
            .zip(&res.values)
            .find_map(|(path, value)| value.is_none().then_some(path))
        {
            return Err(StoreError::PathNotFound {
                key: doc_id,
                path: missing.clone(),
            }
            .into());
        }
        Ok(res.cas)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::replay::HistoryEntry;
    use engine_core::store::MemoryStore;
    use std::collections::BTreeSet;

    pub(crate) fn id() -> CollectionIdentifier {
        CollectionIdentifier::from("t:mem:b:_default:_default")
    }

    pub(crate) fn context(
        store: Arc<MemoryStore>,
        config: OperationConfig,
        history: Vec<(OperationKind, OperationConfig)>,
    ) -> OffsetContext {
        let entries = history
            .into_iter()
            .enumerate()
            .map(|(i, (operation, config))| HistoryEntry {
                operation,
                result_seed: i as i64 + 1,
                identifier: id(),
                config,
                err: BTreeSet::new(),
            })
            .collect();
        OffsetContext {
            client: store,
            generator: Generator::from_config(&config).unwrap(),
            history: Arc::new(ReplayHistory::new(entries, None)),
            identifier: id(),
            options: OffsetContext::store_options(&config),
            config,
            seed: 1_000,
        }
    }

    fn cfg() -> OperationConfig {
        OperationConfig::new(0, 4).with_doc_size(200)
    }

    #[tokio::test]
    async fn insert_writes_generated_document() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), cfg(), vec![]);
        InsertOp.apply(&ctx, 2).await.unwrap();

        let stored = store.peek("1002").await.unwrap();
        assert_eq!(stored, ctx.generator.generate_document(1002));
        let again = InsertOp.apply(&ctx, 2).await.unwrap_err();
        assert!(InsertOp.already_applied(&again));
    }

    #[tokio::test]
    async fn upsert_keeps_sub_document_and_counter() {
        let store = Arc::new(MemoryStore::new());
        let insert = context(store.clone(), cfg(), vec![]);
        InsertOp.apply(&insert, 0).await.unwrap();
        let sub_insert = context(store.clone(), cfg(), vec![(OperationKind::Insert, cfg())]);
        SubDocInsertOp.apply(&sub_insert, 0).await.unwrap();

        let upsert = context(
            store.clone(),
            cfg(),
            vec![
                (OperationKind::Insert, cfg()),
                (OperationKind::SubDocInsert, cfg()),
            ],
        );
        UpsertOp.apply(&upsert, 0).await.unwrap();

        let stored = store.peek("1000").await.unwrap();
        assert_eq!(stored[MUTATION_COUNTER], json!(1));
        assert!(stored["subDoc"]["name"].is_string());
        assert_ne!(stored["firstName"], Value::Null);
    }

    #[tokio::test]
    async fn sub_doc_read_reports_missing_paths() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), cfg(), vec![]);
        InsertOp.apply(&ctx, 1).await.unwrap();

        let err = SubDocReadOp.apply(&ctx, 1).await.unwrap_err();
        assert!(err.to_string().starts_with("path not found |"));

        SubDocInsertOp.apply(&ctx, 1).await.unwrap();
        let err = SubDocInsertOp.apply(&ctx, 1).await.unwrap_err();
        assert!(SubDocInsertOp.already_applied(&err));
        assert!(!SubDocDeleteOp.already_applied(&err));
        SubDocReadOp.apply(&ctx, 1).await.unwrap();
        SubDocDeleteOp.apply(&ctx, 1).await.unwrap();
        let err = SubDocDeleteOp.apply(&ctx, 1).await.unwrap_err();
        assert!(SubDocDeleteOp.already_applied(&err));
    }

    #[tokio::test]
    async fn delete_of_missing_document_counts_as_applied() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store, cfg(), vec![]);
        let err = DeleteOp.apply(&ctx, 0).await.unwrap_err();
        assert!(DeleteOp.already_applied(&err));
        assert!(!InsertOp.already_applied(&err));
    }
}
