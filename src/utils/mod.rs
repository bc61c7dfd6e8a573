// Utility functions

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex lock, recovering from poisoning by returning the guard.
/// Every critical section in this crate leaves its data consistent, so a
/// panic elsewhere does not invalidate it.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

/// Shorten text for log lines, respecting char boundaries
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
