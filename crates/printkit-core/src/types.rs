//! Type aliases for shared state.
//!
//! The executor, exclusion filter and locator share state between the
//! control task and the streaming task. These aliases keep that sharing
//! readable and consistent; `parking_lot` locks are used throughout.

use parking_lot::Mutex;
use std::sync::Arc;

/// A thread-safe, mutex-protected wrapper for cross-task sharing.
///
/// # Example
/// ```rust,ignore
/// let state: ThreadSafe<JobState> = thread_safe(JobState::default());
/// state.lock().position = 42;
/// ```
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// Create a new `ThreadSafe<T>` from a value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_safe_creation() {
        let value: ThreadSafe<u64> = thread_safe(42);
        *value.lock() += 1;
        assert_eq!(*value.lock(), 43);
    }
}
