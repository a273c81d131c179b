//! Per-directory retrieval list.
//!
//! Directories whose files stay in place after ingestion need a memory of
//! what was already picked up, otherwise every scan would re-publish the
//! whole directory. The list lives in `<work>/rl/<dir_id hex>.json`, is
//! opened lazily per batch and written back on close.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{IngestionError, Result};

const LIST_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct RetrievalRecord {
    pub name: String,
    pub mtime: i64,
    pub size: u64,
    pub retrieved: bool,
    #[serde(skip)]
    in_last_scan: bool,
}

#[derive(Serialize, Deserialize)]
struct PersistedList {
    version: u32,
    records: Vec<RetrievalRecord>,
}

/// Outcome of checking one directory entry against the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListPosition {
    pub index: usize,
    /// The file was already picked up and has not changed since. The
    /// caller skips it.
    pub already_retrieved: bool,
}

#[derive(Debug)]
pub struct RetrievalList {
    path: PathBuf,
    records: Vec<RetrievalRecord>,
    dirty: bool,
}

impl RetrievalList {
    pub fn open(work_dir: &Path, dir_id: u32) -> Result<Self> {
        let rl_dir = work_dir.join("rl");
        fs::create_dir_all(&rl_dir).map_err(|source| IngestionError::Io {
            path: rl_dir.clone(),
            source,
        })?;
        let path = rl_dir.join(format!("{dir_id:x}.json"));
        let records = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedList>(&bytes) {
                Ok(list) if list.version == LIST_VERSION => list.records,
                Ok(list) => {
                    warn!(
                        path = %path.display(),
                        version = list.version,
                        "discarding retrieval list with unknown version"
                    );
                    Vec::new()
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "discarding corrupt retrieval list");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(IngestionError::Io { path, source }),
        };
        Ok(Self {
            path,
            records,
            dirty: false,
        })
    }

    /// Look up `name` and record that it was seen in this scan.
    ///
    /// A stored record whose mtime or size no longer matches is treated
    /// as a new file and its `retrieved` flag is reset. Unknown names are
    /// appended with `retrieved` off.
    pub fn check(&mut self, name: &str, mtime: i64, size: u64) -> ListPosition {
        if let Some(index) = self.records.iter().position(|r| r.name == name) {
            let record = &mut self.records[index];
            record.in_last_scan = true;
            if record.mtime == mtime && record.size == size {
                return ListPosition {
                    index,
                    already_retrieved: record.retrieved,
                };
            }
            record.mtime = mtime;
            record.size = size;
            record.retrieved = false;
            self.dirty = true;
            return ListPosition {
                index,
                already_retrieved: false,
            };
        }
        self.records.push(RetrievalRecord {
            name: name.to_string(),
            mtime,
            size,
            retrieved: false,
            in_last_scan: true,
        });
        self.dirty = true;
        ListPosition {
            index: self.records.len() - 1,
            already_retrieved: false,
        }
    }

    pub fn mark_retrieved(&mut self, index: usize) {
        if let Some(record) = self.records.get_mut(index) {
            if !record.retrieved {
                record.retrieved = true;
                self.dirty = true;
            }
        }
    }

    /// Drop records for files that vanished from the directory. Only
    /// meaningful after a full scan, a notification batch does not see
    /// the whole directory.
    pub fn rm_removed_files(&mut self) {
        let before = self.records.len();
        self.records.retain(|r| r.in_last_scan);
        if self.records.len() != before {
            self.dirty = true;
        }
    }

    /// Write the list back and clear the per-scan flags.
    pub fn close(mut self) -> Result<()> {
        for record in &mut self.records {
            record.in_last_scan = false;
        }
        if self.dirty {
            let persisted = PersistedList {
                version: LIST_VERSION,
                records: std::mem::take(&mut self.records),
            };
            let bytes = serde_json::to_vec(&persisted)?;
            fs::write(&self.path, bytes).map_err(|source| IngestionError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.len()
    }
}
