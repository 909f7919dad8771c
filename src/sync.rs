use std::sync::{Mutex, MutexGuard};

/// Acquire mutex guard, ignoring poisoning.
///
/// Guards subscriber lists and the id counter, neither of which is left
/// half-updated by a panicking holder.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
