//! In-process file lock registry
//!
//! Keyed mutual exclusion over case-insensitive normalized paths, used by
//! the write and patch tools so two workers never interleave writes to the
//! same file. Re-entry by the holding worker returns immediately. Scope is
//! strictly in-process; cross-process safety is not provided.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// State of one path's lock
struct LockEntry {
    /// Worker index holding the lock, None when free
    holder: Option<usize>,
    /// When the current holder acquired it
    acquired_at: Option<Instant>,
    /// Waiters park here; release wakes one (FIFO)
    notify: Arc<Notify>,
}

impl LockEntry {
    fn free() -> Self {
        Self {
            holder: None,
            acquired_at: None,
            notify: Arc::new(Notify::new()),
        }
    }
}

/// Diagnostic view of a held lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub path: String,
    pub holder: usize,
    pub held_for: std::time::Duration,
}

/// Per-path mutual exclusion for worker writes
pub struct FileLockRegistry {
    // Entries persist for the process lifetime so waiters never lose their
    // Notify handle between release and re-acquisition.
    locks: Mutex<HashMap<String, LockEntry>>,
}

impl FileLockRegistry {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Normalize a path into a lock key: forward slashes, trimmed, lowercase
    fn key(path: &str) -> String {
        path.trim().replace('\\', "/").to_lowercase()
    }

    /// Block until this worker holds the lock for `path`
    ///
    /// Re-entrant: if the same worker already holds the lock, returns
    /// immediately without deadlocking on itself.
    pub async fn acquire(&self, path: &str, worker: usize) {
        let key = Self::key(path);
        loop {
            let notify = {
                let mut locks = self.locks.lock().await;
                let entry = locks.entry(key.clone()).or_insert_with(LockEntry::free);
                match entry.holder {
                    None => {
                        entry.holder = Some(worker);
                        entry.acquired_at = Some(Instant::now());
                        debug!(path = %key, worker, "FileLockRegistry::acquire: acquired");
                        return;
                    }
                    Some(holder) if holder == worker => {
                        debug!(path = %key, worker, "FileLockRegistry::acquire: re-entrant");
                        return;
                    }
                    Some(holder) => {
                        debug!(path = %key, worker, holder, "FileLockRegistry::acquire: waiting");
                        entry.notify.clone()
                    }
                }
            };
            notify.notified().await;
        }
    }

    /// Drop the lock for `path` and wake one waiter (FIFO)
    pub async fn release(&self, path: &str) {
        let key = Self::key(path);
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get_mut(&key) {
            debug!(path = %key, holder = ?entry.holder, "FileLockRegistry::release");
            entry.holder = None;
            entry.acquired_at = None;
            entry.notify.notify_one();
        }
    }

    /// Currently held locks, for diagnostics
    pub async fn held(&self) -> Vec<LockInfo> {
        let locks = self.locks.lock().await;
        locks
            .iter()
            .filter_map(|(path, entry)| {
                entry.holder.map(|holder| LockInfo {
                    path: path.clone(),
                    holder,
                    held_for: entry.acquired_at.map(|t| t.elapsed()).unwrap_or_default(),
                })
            })
            .collect()
    }
}

impl Default for FileLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
