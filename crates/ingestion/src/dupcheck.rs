//! Duplicate detection over a sliding time window.
//!
//! Each watch directory owns one fingerprint table persisted under
//! `<work>/crc/<dir_id hex>.json`. A fingerprint seen again within the
//! configured timeout marks the file as a duplicate.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entry::{DupCheckPolicy, DupFingerprint};
use crate::error::{IngestionError, Result};

const STORE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    version: u32,
    entries: Vec<(u32, i64)>,
}

/// Fingerprint table for one directory.
#[derive(Debug)]
pub struct DupStore {
    path: PathBuf,
    entries: HashMap<u32, i64>,
    dirty: bool,
}

/// Compute the fingerprint of a candidate per the configured scheme.
pub fn fingerprint(
    policy: &DupCheckPolicy,
    name: &str,
    size: u64,
    path: &Path,
) -> Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    match policy.fingerprint {
        DupFingerprint::Name => hasher.update(name.as_bytes()),
        DupFingerprint::NameSize => {
            hasher.update(name.as_bytes());
            hasher.update(&size.to_le_bytes());
        }
        DupFingerprint::Content => {
            let data = fs::read(path).map_err(|source| IngestionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            hasher.update(&data);
        }
    }
    Ok(hasher.finalize())
}

/// Where a duplicate goes when the policy says to store it.
pub fn store_path(work_dir: &Path, dir_id: u32, name: &str) -> PathBuf {
    work_dir
        .join("files")
        .join("store")
        .join(format!("{dir_id:x}"))
        .join(name)
}

impl DupStore {
    /// Load (or create) the table for `dir_id`.
    pub fn open(work_dir: &Path, dir_id: u32) -> Result<Self> {
        let crc_dir = work_dir.join("crc");
        fs::create_dir_all(&crc_dir).map_err(|source| IngestionError::Io {
            path: crc_dir.clone(),
            source,
        })?;
        let path = crc_dir.join(format!("{dir_id:x}.json"));
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedStore>(&bytes) {
                Ok(persisted) if persisted.version == STORE_VERSION => {
                    persisted.entries.into_iter().collect()
                }
                Ok(persisted) => {
                    warn!(
                        path = %path.display(),
                        version = persisted.version,
                        "discarding dupcheck table with unknown version"
                    );
                    HashMap::new()
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "discarding corrupt dupcheck table");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(IngestionError::Io { path, source }),
        };
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    /// Check one fingerprint. Returns true when it was already seen within
    /// the window. The entry is inserted (or its timestamp refreshed) in
    /// either case.
    pub fn check(&mut self, fp: u32, now: i64, timeout_secs: i64) -> bool {
        let is_dup = self
            .entries
            .get(&fp)
            .is_some_and(|&seen| now - seen < timeout_secs);
        self.entries.insert(fp, now);
        self.dirty = true;
        is_dup
    }

    /// Revoke a fingerprint, used when a file failed after being checked
    /// so a resend is not flagged as a duplicate.
    pub fn remove(&mut self, fp: u32) {
        if self.entries.remove(&fp).is_some() {
            self.dirty = true;
        }
    }

    /// Drop entries older than the window.
    pub fn prune(&mut self, now: i64, timeout_secs: i64) {
        let before = self.entries.len();
        self.entries.retain(|_, &mut seen| now - seen < timeout_secs);
        if self.entries.len() != before {
            self.dirty = true;
        }
    }

    /// Write the table back if it changed.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let persisted = PersistedStore {
            version: STORE_VERSION,
            entries: self.entries.iter().map(|(&fp, &t)| (fp, t)).collect(),
        };
        let bytes = serde_json::to_vec(&persisted)?;
        fs::write(&self.path, bytes).map_err(|source| IngestionError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }
}
