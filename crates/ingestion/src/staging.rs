//! Staging publisher.
//!
//! Accepted files land in a uniquely-named directory under
//! `<work>/files/pool/` where the transfer side picks them up. Directory
//! names encode priority, creation second, directory id, unique counter
//! and split counter, so two accepts in the same second never collide.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::entry::DirectoryEntry;
use crate::error::{IngestionError, Result};

/// Back-off before retrying `create_name` after the filesystem ran full.
pub const DISK_FULL_RESCAN_TIME: Duration = Duration::from_secs(20);

/// Result of publishing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Staged successfully, carrying the file size in bytes.
    Published(u64),
    /// The declared terminating byte was missing, file left at the source.
    EndCharMismatch,
}

/// A freshly created staging directory.
#[derive(Debug)]
pub struct StagingName {
    pub path: PathBuf,
    /// True when `create_name` had to wait out an out-of-space condition.
    /// The batch is then finished with `full_scan` off so the watcher
    /// re-enters promptly.
    pub slept: bool,
}

type MkdirFn = Box<dyn FnMut(&Path) -> io::Result<()> + Send>;
type SleepFn = Box<dyn FnMut(Duration) + Send>;

pub struct StagingPublisher {
    pool_dir: PathBuf,
    split_counter: u32,
    mkdir: MkdirFn,
    sleep: SleepFn,
}

impl std::fmt::Debug for StagingPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingPublisher")
            .field("pool_dir", &self.pool_dir)
            .field("split_counter", &self.split_counter)
            .finish()
    }
}

impl StagingPublisher {
    pub fn new(work_dir: &Path) -> Self {
        Self::with_hooks(
            work_dir,
            Box::new(|p| fs::create_dir(p)),
            Box::new(std::thread::sleep),
        )
    }

    /// Construction with injectable mkdir/sleep, used by the tests to
    /// simulate out-of-space without filling a filesystem.
    pub fn with_hooks(work_dir: &Path, mkdir: MkdirFn, sleep: SleepFn) -> Self {
        Self {
            pool_dir: work_dir.join("files").join("pool"),
            split_counter: 0,
            mkdir,
            sleep,
        }
    }

    pub fn pool_dir(&self) -> &Path {
        &self.pool_dir
    }

    /// Create the staging directory for one accepted file.
    ///
    /// Retries indefinitely with [`DISK_FULL_RESCAN_TIME`] back-off while
    /// the filesystem reports out-of-space.
    pub fn create_name(
        &mut self,
        priority: char,
        creation_secs: i64,
        dir_id: u32,
        unique: u32,
    ) -> Result<StagingName> {
        fs::create_dir_all(&self.pool_dir).map_err(|source| IngestionError::Io {
            path: self.pool_dir.clone(),
            source,
        })?;
        let split = self.split_counter;
        self.split_counter = self.split_counter.wrapping_add(1);
        let name = format!("{priority}{creation_secs}_{dir_id:x}_{unique:x}_{split:x}");
        let path = self.pool_dir.join(name);
        let mut slept = false;
        loop {
            match (self.mkdir)(&path) {
                Ok(()) => {
                    return Ok(StagingName { path, slept });
                }
                Err(err) if err.raw_os_error() == Some(libc::ENOSPC) => {
                    warn!(
                        path = %path.display(),
                        "filesystem full, retrying in {}s",
                        DISK_FULL_RESCAN_TIME.as_secs()
                    );
                    (self.sleep)(DISK_FULL_RESCAN_TIME);
                    slept = true;
                }
                Err(source) => {
                    return Err(IngestionError::Io { path, source });
                }
            }
        }
    }

    /// Move (or copy) `src` into `staging_dir` under `name`.
    pub fn publish(
        &mut self,
        entry: &DirectoryEntry,
        src: &Path,
        name: &str,
        staging_dir: &Path,
    ) -> Result<PublishOutcome> {
        if let Some(expected) = entry.end_character {
            if !ends_with_byte(src, expected)? {
                debug!(
                    file = name,
                    expected = expected,
                    "terminating byte missing, leaving file for the next scan"
                );
                return Ok(PublishOutcome::EndCharMismatch);
            }
        }

        let dst = staging_dir.join(name);
        let size = if entry.remove {
            move_file(entry, src, &dst)?
        } else {
            copy_file(src, &dst)?
        };
        Ok(PublishOutcome::Published(size))
    }
}

fn ends_with_byte(path: &Path, expected: u8) -> Result<bool> {
    let map_err = |source| IngestionError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(map_err)?;
    let len = file.metadata().map_err(map_err)?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).map_err(map_err)?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).map_err(map_err)?;
    Ok(last[0] == expected)
}

fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    fs::copy(src, dst).map_err(|source| IngestionError::Io {
        path: dst.to_path_buf(),
        source,
    })
}

fn move_file(entry: &DirectoryEntry, src: &Path, dst: &Path) -> Result<u64> {
    if entry.in_same_filesystem {
        match fs::rename(src, dst) {
            Ok(()) => {
                return fs::metadata(dst)
                    .map(|m| m.len())
                    .map_err(|source| IngestionError::Io {
                        path: dst.to_path_buf(),
                        source,
                    });
            }
            Err(err) if err.raw_os_error() == Some(libc::EXDEV) => {
                debug!(
                    src = %src.display(),
                    "rename crossed a filesystem boundary, copying instead"
                );
            }
            Err(source) => {
                return Err(IngestionError::Io {
                    path: src.to_path_buf(),
                    source,
                });
            }
        }
    }
    let size = copy_file(src, dst)?;
    fs::remove_file(src).map_err(|source| IngestionError::Io {
        path: src.to_path_buf(),
        source,
    })?;
    Ok(size)
}
