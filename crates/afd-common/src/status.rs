//! Per-directory runtime status.
//!
//! One `DirectoryRuntimeStatus` exists per monitored directory. The
//! ingestion pipeline is the single writer; the watcher daemon and any
//! status reporting read it. All mutation goes through the per-entry
//! mutex in [`SharedStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Bits carried in `dir_flag`.
pub mod dir_flag {
    /// All hosts fed by this directory are disabled.
    pub const ALL_DISABLED: u32 = 1 << 0;
    /// `error_counter` reached `max_errors`.
    pub const DIR_ERROR_SET: u32 = 1 << 1;
    /// The last batch stopped early at the copy limits.
    pub const MAX_COPIED: u32 = 1 << 2;
    /// A full directory scan is needed before trusting notifications again.
    pub const INOTIFY_NEEDS_SCAN: u32 = 1 << 3;
    /// The directory has been quiet past its info time.
    pub const INFO_TIME_REACHED: u32 = 1 << 4;
    /// The directory has been quiet past its warn time.
    pub const WARN_TIME_REACHED: u32 = 1 << 5;
}

/// Convenience wrapper for reading/altering `dir_flag` bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirFlags(pub u32);

impl DirFlags {
    pub fn is_set(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u32) {
        self.0 &= !bit;
    }
}

/// Runtime counters and state for one monitored directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryRuntimeStatus {
    pub error_counter: u32,
    pub max_errors: u32,
    pub files_received: u64,
    pub bytes_received: u64,
    pub files_in_dir: u32,
    pub bytes_in_dir: u64,
    pub last_retrieval: Option<DateTime<Utc>>,
    pub dir_flag: DirFlags,
}

impl Default for DirectoryRuntimeStatus {
    fn default() -> Self {
        Self {
            error_counter: 0,
            max_errors: 10,
            files_received: 0,
            bytes_received: 0,
            files_in_dir: 0,
            bytes_in_dir: 0,
            last_retrieval: None,
            dir_flag: DirFlags::default(),
        }
    }
}

/// Shared, lockable handle to a directory's runtime status.
#[derive(Debug, Clone)]
pub struct SharedStatus(Arc<Mutex<DirectoryRuntimeStatus>>);

impl SharedStatus {
    pub fn new(status: DirectoryRuntimeStatus) -> Self {
        Self(Arc::new(Mutex::new(status)))
    }

    /// Lock the entry. Poisoning is unrecoverable here, so a poisoned
    /// lock yields the inner guard anyway.
    pub fn lock(&self) -> MutexGuard<'_, DirectoryRuntimeStatus> {
        match self.0.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Read a copy of the current status.
    pub fn snapshot(&self) -> DirectoryRuntimeStatus {
        self.lock().clone()
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new(DirectoryRuntimeStatus::default())
    }
}
