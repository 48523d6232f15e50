use crate::{
    error::OffsetError,
    operation::{MUTATION_COUNTER, OffsetContext, OperationStrategy},
};
use async_trait::async_trait;
use generator::{Template, apply_sub_document};
use model::{OperationKind, document::flatten};
use serde_json::Value;

/// Compares the live document against the state replay says it should have.
pub struct ValidateOp;

#[async_trait]
impl OperationStrategy for ValidateOp {
    fn kind(&self) -> OperationKind {
        OperationKind::Validate
    }

    async fn apply(&self, ctx: &OffsetContext, offset: i64) -> Result<u64, OffsetError> {
        let doc_id = ctx.doc_id(offset);
        let deleted = ctx.history.is_deleted(&ctx.identifier, offset);
        let tolerates_missing = deleted || ctx.history.tolerates_missing(&ctx.identifier, offset);

        let live = match ctx.client.get(&doc_id, &ctx.options).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() && tolerates_missing => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        if deleted {
            return Err(OffsetError::integrity(&doc_id, "document should be deleted"));
        }

        let expected = expected_document(ctx, offset)?;
        compare(&doc_id, &expected, &live.value, ctx.config.strict_paths)?;

        let counter = live
            .value
            .get(MUTATION_COUNTER)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let expected_count = ctx.history.count_mutation(&ctx.identifier, offset);
        if counter != expected_count {
            return Err(OffsetError::integrity(
                &doc_id,
                format!("{MUTATION_COUNTER}={counter} expected={expected_count}"),
            ));
        }
        Ok(live.cas)
    }
}

/// Document plus sub-document as the last writers left them, without the
/// mutation counter.
fn expected_document(ctx: &OffsetContext, offset: i64) -> Result<Value, OffsetError> {
    let key = ctx.key(offset);
    let mut doc = match ctx.history.last_document_writer(&ctx.identifier, offset) {
        Some(writer) => {
            let template: Template = writer.config.template.parse().map_err(|e| {
                OffsetError::integrity(&ctx.doc_id(offset), format!("writer config: {e}"))
            })?;
            ctx.history
                .retrace_document(&ctx.identifier, offset, key, template, writer.config.doc_size)
                .0
        }
        None => Value::Object(Default::default()),
    };
    if let Some(sub) = ctx.history.expected_sub_document(&ctx.identifier, offset, key) {
        apply_sub_document(&mut doc, &sub);
    }
    Ok(doc)
}

fn compare(doc_id: &str, expected: &Value, live: &Value, strict: bool) -> Result<(), OffsetError> {
    let expected = flatten(expected);
    let mut live = flatten(live);
    live.remove(MUTATION_COUNTER);

    for (path, want) in &expected {
        match live.remove(path) {
            Some(got) if got == *want => {}
            Some(got) => {
                return Err(OffsetError::integrity(
                    doc_id,
                    format!("path={path} expected={want} actual={got}"),
                ));
            }
            None => {
                return Err(OffsetError::integrity(doc_id, format!("path={path} missing")));
            }
        }
    }

    if strict && let Some(path) = live.keys().next() {
        return Err(OffsetError::integrity(
            doc_id,
            format!("path={path} unexpected"),
        ));
    }
    Ok(())
}
