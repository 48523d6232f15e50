//! Mutation replay.
//!
//! Generated documents are never stored. Expected state at an offset is
//! rebuilt from the request history: regenerate the baseline from the key,
//! then reapply every mutation that landed on that offset, in submission
//! order, drawing from the same content stream the writers used.
//!
//! An entry takes part in replay when it targets the same collection
//! identifier, its range covers the offset, it is not the run being executed,
//! and its outcome at the offset is not Err. Such entries are called
//! effective below.

use engine_core::task::SharedTask;
use futures::future::join_all;
use generator::{ContentStream, SubDocument, Template};
use model::{CollectionIdentifier, OperationConfig, OperationKind};
use serde_json::Value;
use std::collections::BTreeSet;

/// Frozen view of one history entry.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub operation: OperationKind,
    pub result_seed: i64,
    pub identifier: CollectionIdentifier,
    pub config: OperationConfig,
    pub err: BTreeSet<i64>,
}

impl HistoryEntry {
    fn covers(&self, identifier: &CollectionIdentifier, offset: i64) -> bool {
        self.identifier == *identifier && self.config.contains(offset) && !self.err.contains(&offset)
    }
}

/// Regenerated sub-document together with the stream that produced it.
#[derive(Debug, Clone)]
pub struct SubDocState {
    /// Whether the sub-document currently exists on the document.
    pub present: bool,
    pub paths: SubDocument,
    pub stream: ContentStream,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayHistory {
    entries: Vec<HistoryEntry>,
    current: Option<i64>,
}

impl ReplayHistory {
    pub fn new(entries: Vec<HistoryEntry>, current: Option<i64>) -> Self {
        Self { entries, current }
    }

    /// Snapshot of the history that precedes the run `current` (the whole
    /// history when `current` is not part of it).
    pub async fn capture(history: &[SharedTask], current: i64) -> Self {
        let preceding = history
            .iter()
            .take_while(|task| task.result_seed != current);
        let entries = join_all(preceding.map(|task| async move {
            HistoryEntry {
                operation: task.operation,
                result_seed: task.result_seed,
                identifier: task.identifier().clone(),
                config: task.config.clone(),
                err: task.state.return_err_offset().await,
            }
        }))
        .await;
        Self::new(entries, Some(current))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn effective<'a>(
        &'a self,
        identifier: &CollectionIdentifier,
        offset: i64,
    ) -> impl DoubleEndedIterator<Item = &'a HistoryEntry> + use<'a> {
        let identifier = identifier.clone();
        let current = self.current;
        self.entries
            .iter()
            .filter(move |e| Some(e.result_seed) != current && e.covers(&identifier, offset))
    }

    /// Last effective entry whose kind satisfies `pred`.
    pub fn last_config(
        &self,
        identifier: &CollectionIdentifier,
        offset: i64,
        pred: impl Fn(OperationKind) -> bool,
    ) -> Option<&HistoryEntry> {
        self.effective(identifier, offset)
            .rev()
            .find(|e| pred(e.operation))
    }

    /// Last effective Insert or Upsert.
    pub fn last_document_writer(
        &self,
        identifier: &CollectionIdentifier,
        offset: i64,
    ) -> Option<&HistoryEntry> {
        self.last_config(identifier, offset, |op| op.writes_document())
    }

    /// Last effective SubDocInsert or SubDocUpsert.
    pub fn last_sub_document_writer(
        &self,
        identifier: &CollectionIdentifier,
        offset: i64,
    ) -> Option<&HistoryEntry> {
        self.last_config(identifier, offset, |op| op.writes_sub_document())
    }

    /// Whether the document at `offset` was removed by its last effective
    /// document-level write.
    pub fn is_deleted(&self, identifier: &CollectionIdentifier, offset: i64) -> bool {
        self.last_config(identifier, offset, |op| {
            op.writes_document() || op == OperationKind::Delete
        })
        .is_some_and(|e| e.operation == OperationKind::Delete)
    }

    /// Whether the last effective mutation at `offset` removed the document
    /// or its whole sub-document, so a missing document is not a drift.
    pub fn tolerates_missing(&self, identifier: &CollectionIdentifier, offset: i64) -> bool {
        self.last_config(identifier, offset, |op| op.is_mutation())
            .is_some_and(|e| e.operation.is_delete())
    }

    /// Entries after the last effective entry matching `reset`, in order.
    fn since_reset<'a>(
        &'a self,
        identifier: &CollectionIdentifier,
        offset: i64,
        reset: impl Fn(OperationKind) -> bool,
    ) -> Vec<&'a HistoryEntry> {
        let effective: Vec<&HistoryEntry> = self.effective(identifier, offset).collect();
        let start = effective
            .iter()
            .rposition(|e| reset(e.operation))
            .map(|pos| pos + 1)
            .unwrap_or(0);
        effective[start..].to_vec()
    }

    fn resets_document(op: OperationKind) -> bool {
        matches!(op, OperationKind::Insert | OperationKind::Delete)
    }

    fn resets_sub_document(op: OperationKind) -> bool {
        matches!(
            op,
            OperationKind::Insert
                | OperationKind::Delete
                | OperationKind::SubDocInsert
                | OperationKind::SubDocDelete
        )
    }

    /// Successful sub-document mutations since the document was last created
    /// or removed.
    pub fn count_mutation(&self, identifier: &CollectionIdentifier, offset: i64) -> i64 {
        self.since_reset(identifier, offset, Self::resets_document)
            .iter()
            .filter(|e| e.operation.counts_mutation())
            .count() as i64
    }

    /// Baseline document for `key` with every effective Upsert reapplied.
    ///
    /// The returned stream sits right after the last replayed mutation, so a
    /// caller writing a new mutation continues the same sequence.
    pub fn retrace_document(
        &self,
        identifier: &CollectionIdentifier,
        offset: i64,
        key: i64,
        template: Template,
        doc_size: usize,
    ) -> (Value, ContentStream) {
        let mut stream = ContentStream::for_document(key);
        let mut doc = stream.generate(template, doc_size);
        for entry in self.since_reset(identifier, offset, Self::resets_document) {
            if entry.operation == OperationKind::Upsert {
                stream.mutate(template, &mut doc, &entry.config.fields_to_change);
            }
        }
        (doc, stream)
    }

    /// Baseline sub-document for `key` with every effective SubDocUpsert
    /// reapplied since it was last inserted or removed.
    pub fn retrace_sub_document(
        &self,
        identifier: &CollectionIdentifier,
        offset: i64,
        key: i64,
        size: usize,
    ) -> SubDocState {
        let mut stream = ContentStream::for_sub_document(key);
        let mut paths = stream.generate_sub_document(size);

        let reset_kind = self
            .last_config(identifier, offset, Self::resets_sub_document)
            .map(|e| e.operation);
        let mut present = reset_kind == Some(OperationKind::SubDocInsert);

        for entry in self.since_reset(identifier, offset, Self::resets_sub_document) {
            if entry.operation == OperationKind::SubDocUpsert {
                stream.mutate_sub_document(&mut paths, &entry.config.fields_to_change);
                present = true;
            }
        }
        SubDocState {
            present,
            paths,
            stream,
        }
    }

    /// Sub-document as it should currently be stored, sized by the last
    /// sub-document writer. `None` when no sub-document is expected.
    pub fn expected_sub_document(
        &self,
        identifier: &CollectionIdentifier,
        offset: i64,
        key: i64,
    ) -> Option<SubDocument> {
        let writer = self.last_sub_document_writer(identifier, offset)?;
        let state = self.retrace_sub_document(identifier, offset, key, writer.config.doc_size);
        state.present.then_some(state.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> CollectionIdentifier {
        CollectionIdentifier::from("t:mem:b:_default:_default")
    }

    fn entry(operation: OperationKind, result_seed: i64, fields: &[&str]) -> HistoryEntry {
        HistoryEntry {
            operation,
            result_seed,
            identifier: id(),
            config: OperationConfig::new(0, 10)
                .with_doc_size(128)
                .with_fields_to_change(fields.iter().map(|f| f.to_string()).collect()),
            err: BTreeSet::new(),
        }
    }

    /// What a store would hold after running each upsert in turn.
    fn apply_sequentially(key: i64, upserts: &[&[&str]]) -> Value {
        let mut stream = ContentStream::for_document(key);
        let mut doc = stream.generate(Template::Person, 128);
        for fields in upserts {
            let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
            stream.mutate(Template::Person, &mut doc, &fields);
        }
        doc
    }

    #[test]
    fn replays_sequential_upserts() {
        let history = ReplayHistory::new(
            vec![
                entry(OperationKind::Insert, 1, &[]),
                entry(OperationKind::Upsert, 2, &["age"]),
                entry(OperationKind::Upsert, 3, &[]),
                entry(OperationKind::Upsert, 4, &["status", "email"]),
            ],
            None,
        );
        let (doc, _) = history.retrace_document(&id(), 3, 1003, Template::Person, 128);
        assert_eq!(
            doc,
            apply_sequentially(1003, &[&["age"], &[], &["status", "email"]])
        );
    }

    #[test]
    fn skips_err_offsets_current_run_and_other_collections() {
        let mut failed = entry(OperationKind::Upsert, 2, &["age"]);
        failed.err.insert(3);
        let mut elsewhere = entry(OperationKind::Upsert, 3, &["age"]);
        elsewhere.identifier = CollectionIdentifier::from("t:mem:b:_default:other");
        let current = entry(OperationKind::Upsert, 9, &["age"]);

        let history = ReplayHistory::new(
            vec![entry(OperationKind::Insert, 1, &[]), failed, elsewhere, current],
            Some(9),
        );
        let (doc, _) = history.retrace_document(&id(), 3, 77, Template::Person, 128);
        assert_eq!(doc, apply_sequentially(77, &[]));

        let (doc, _) = history.retrace_document(&id(), 4, 77, Template::Person, 128);
        assert_eq!(doc, apply_sequentially(77, &[&["age"]]));
    }

    #[test]
    fn delete_resets_document_lineage() {
        let history = ReplayHistory::new(
            vec![
                entry(OperationKind::Insert, 1, &[]),
                entry(OperationKind::Upsert, 2, &[]),
                entry(OperationKind::SubDocInsert, 3, &[]),
                entry(OperationKind::Delete, 4, &[]),
            ],
            None,
        );
        assert!(history.is_deleted(&id(), 0));
        assert_eq!(history.count_mutation(&id(), 0), 0);

        let (doc, _) = history.retrace_document(&id(), 0, 5, Template::Person, 128);
        assert_eq!(doc, apply_sequentially(5, &[]));
        assert!(history.expected_sub_document(&id(), 0, 5).is_none());
    }

    #[test]
    fn counts_and_retraces_sub_document_mutations() {
        let history = ReplayHistory::new(
            vec![
                entry(OperationKind::Insert, 1, &[]),
                entry(OperationKind::SubDocInsert, 2, &[]),
                entry(OperationKind::SubDocUpsert, 3, &[]),
                entry(OperationKind::Upsert, 4, &[]),
                entry(OperationKind::SubDocUpsert, 5, &["subDoc.rank"]),
            ],
            None,
        );
        assert_eq!(history.count_mutation(&id(), 2), 3);
        assert!(!history.is_deleted(&id(), 2));

        let mut stream = ContentStream::for_sub_document(12);
        let mut expected = stream.generate_sub_document(128);
        stream.mutate_sub_document(&mut expected, &[]);
        stream.mutate_sub_document(&mut expected, &["subDoc.rank".to_string()]);
        assert_eq!(history.expected_sub_document(&id(), 2, 12), Some(expected));
    }

    #[test]
    fn sub_document_delete_tolerates_missing_document() {
        let history = ReplayHistory::new(
            vec![
                entry(OperationKind::Insert, 1, &[]),
                entry(OperationKind::SubDocInsert, 2, &[]),
                entry(OperationKind::SubDocDelete, 3, &[]),
            ],
            None,
        );
        assert!(history.tolerates_missing(&id(), 0));
        assert!(!history.is_deleted(&id(), 0));

        let upserted = ReplayHistory::new(
            vec![
                entry(OperationKind::Insert, 1, &[]),
                entry(OperationKind::SubDocDelete, 2, &[]),
                entry(OperationKind::Upsert, 3, &[]),
            ],
            None,
        );
        assert!(!upserted.tolerates_missing(&id(), 0));
    }

    #[test]
    fn sub_document_delete_removes_expectation() {
        let history = ReplayHistory::new(
            vec![
                entry(OperationKind::Insert, 1, &[]),
                entry(OperationKind::SubDocInsert, 2, &[]),
                entry(OperationKind::SubDocDelete, 3, &[]),
            ],
            None,
        );
        assert!(history.expected_sub_document(&id(), 0, 1).is_none());
        assert_eq!(history.count_mutation(&id(), 0), 2);
        assert_eq!(
            history
                .last_config(&id(), 0, |op| op.is_mutation())
                .map(|e| e.result_seed),
            Some(3)
        );
    }
}
