//! Per-directory configuration: the `DirectoryEntry`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use afd_common::mask::MaskGroup;
use afd_common::status::SharedStatus;
use bulletin_parser::ExtractOptions;

/// Comparison direction for the size/age ignore predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Equal,
    Less,
    Greater,
}

impl Comparator {
    pub fn compare(&self, value: i64, threshold: i64) -> bool {
        match self {
            Comparator::Equal => value == threshold,
            Comparator::Less => value < threshold,
            Comparator::Greater => value > threshold,
        }
    }
}

/// Files whose size satisfies the predicate are ignored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizePredicate {
    pub comparator: Comparator,
    pub size: u64,
}

/// Files whose age (now - mtime) satisfies the predicate are ignored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgePredicate {
    pub comparator: Comparator,
    pub seconds: i64,
}

/// Fingerprint used by the duplicate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DupFingerprint {
    Name,
    NameSize,
    Content,
}

/// What to do with a detected duplicate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DupActions {
    pub delete: bool,
    pub store: bool,
    pub warn: bool,
}

/// Duplicate-check policy for one directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DupCheckPolicy {
    pub timeout: Duration,
    pub fingerprint: DupFingerprint,
    pub actions: DupActions,
}

/// Policy for files no mask wants.
pub const UNKNOWN_FILE_TIME_IMMEDIATE: i64 = -2;

/// One monitored source directory.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Stable 32-bit identifier.
    pub dir_id: u32,
    pub alias: String,
    /// Absolute source path.
    pub path: PathBuf,
    /// Priority character prefixed to staging directory names.
    pub priority: char,
    /// Disjunction of conjunctive filter groups.
    pub mask_groups: Vec<MaskGroup>,
    /// Short-circuit accept, no mask evaluation.
    pub all_files: bool,
    /// Producers lock files under these names; matching names are skipped.
    pub lock_masks: Vec<MaskGroup>,
    /// Staging shares a filesystem with the source, rename is possible.
    pub in_same_filesystem: bool,
    /// Remove accepted files from the source (move) instead of copying.
    pub remove: bool,
    /// No retrieval-list bookkeeping; every scan re-offers every file.
    pub stupid_mode: bool,
    /// Position in the host-status table; `None` for locally-ingested
    /// directories.
    pub fsa_pos: Option<usize>,
    pub ignore_size: Option<SizePredicate>,
    pub ignore_file_time: Option<AgePredicate>,
    /// Age threshold for deleting unwanted files;
    /// [`UNKNOWN_FILE_TIME_IMMEDIATE`] deletes right away.
    pub unknown_file_time: i64,
    /// Unwanted files are deleted (delete_files_flag UNKNOWN_FILES).
    pub delete_unknown_files: bool,
    pub dup_check: Option<DupCheckPolicy>,
    /// Batch stops after this many published files.
    pub max_copied_files: u32,
    /// Batch stops after this many published bytes.
    pub max_copied_file_size: u64,
    /// Required last byte of a staged file.
    pub end_character: Option<u8>,
    /// Bulletin extraction applied to staged files.
    pub extract: Option<ExtractOptions>,
    pub status: SharedStatus,
}

impl DirectoryEntry {
    /// A minimal entry for the given path, everything else defaulted.
    pub fn new(dir_id: u32, alias: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            dir_id,
            alias: alias.into(),
            path: path.into(),
            priority: '9',
            mask_groups: Vec::new(),
            all_files: true,
            lock_masks: Vec::new(),
            in_same_filesystem: false,
            remove: true,
            stupid_mode: false,
            fsa_pos: None,
            ignore_size: None,
            ignore_file_time: None,
            unknown_file_time: 0,
            delete_unknown_files: false,
            dup_check: None,
            max_copied_files: 100,
            max_copied_file_size: 100 * 1024 * 1024,
            end_character: None,
            extract: None,
            status: SharedStatus::default(),
        }
    }
}
