use std::sync::atomic::{AtomicI32, Ordering};

/// Per-handler source of submit_sm sequence numbers.
///
/// Values run 1, 2, ..., `i32::MAX - 1` and then wrap back to 1; 0 is never
/// handed out.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    current: AtomicI32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose next value follows `current`
    pub fn starting_after(current: i32) -> Self {
        Self {
            current: AtomicI32::new(current),
        }
    }

    pub fn next(&self) -> i32 {
        let previous = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(advance(v)))
            .unwrap_or_else(|v| v);
        advance(previous)
    }
}

fn advance(current: i32) -> i32 {
    if !(0..i32::MAX - 1).contains(&current) {
        1
    } else {
        current + 1
    }
}
