//! Shared helpers for unit and integration tests.
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serializes tests that mutate process-wide environment variables.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
