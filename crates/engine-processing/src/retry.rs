use crate::error::OffsetError;
use engine_core::{error::StoreError, retry::RetryDisposition};

/// Whether a failed offset is worth another immediate attempt.
///
/// Replies that describe the document's state (exists, not found, path
/// present or absent) would come back the same on every attempt, and
/// integrity failures are never retried automatically.
pub fn classify_offset_error(err: &OffsetError) -> RetryDisposition {
    match err {
        OffsetError::Store(store) => classify_store_error(store),
        OffsetError::Integrity { .. } => RetryDisposition::Stop,
    }
}

pub fn classify_store_error(err: &StoreError) -> RetryDisposition {
    if err.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}
