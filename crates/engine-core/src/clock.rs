use std::sync::atomic::{AtomicI64, Ordering};

static LAST_SEED: AtomicI64 = AtomicI64::new(0);

/// Nanosecond clock reading, strictly increasing within the process.
///
/// Used for collection seeds and result seeds; two calls inside the same
/// nanosecond still get distinct values.
pub fn next_seed() -> i64 {
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let mut last = LAST_SEED.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_SEED.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}
