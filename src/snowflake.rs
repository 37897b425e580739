use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// 2025-01-01T00:00:00Z
const EPOCH_MS: u64 = 1_735_689_600_000;
const TIMESTAMP_SHIFT: u32 = 22;

static LAST: AtomicU64 = AtomicU64::new(0);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS)
}

/// Next id: milliseconds since the epoch in the high bits, a per-millisecond
/// counter in the low 22. Strictly increasing within the process, even if
/// the wall clock steps backwards.
pub fn next_id() -> u64 {
    let base = now_ms().saturating_sub(EPOCH_MS) << TIMESTAMP_SHIFT;
    let mut next = base;
    // The closure always returns Some, so the update cannot fail.
    let _ = LAST.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        next = base.max(last + 1);
        Some(next)
    });
    next
}

pub fn generate() -> String {
    next_id().to_string()
}

/// Unix milliseconds at which `id` was minted.
pub fn timestamp_of(id: &str) -> Option<u64> {
    let num: u64 = id.parse().ok()?;
    Some((num >> TIMESTAMP_SHIFT) + EPOCH_MS)
}
