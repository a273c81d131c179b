//! Filter and gating evaluation for candidate files.
//!
//! Every candidate runs through an explicit decision pipeline instead of
//! nested early returns: the outcome is a tagged [`GateDecision`] and the
//! batch loop performs the follow-up action.

use std::fs::Metadata;

use chrono::{DateTime, Utc};

use afd_common::mask::wanted;
use afd_common::status::dir_flag;

use crate::entry::{DirectoryEntry, UNKNOWN_FILE_TIME_IMMEDIATE};
use crate::logs::DeleteReason;

/// Why a file stays in the source directory untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    SizeIgnored,
    AgeIgnored,
    NoReadPermission,
    NotWanted,
    DirectoryDisabled,
}

/// Decision for one candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Continue into duplicate check and staging.
    Accept,
    /// Leave the file in place.
    Leave(LeaveReason),
    /// Unlink the file and write a delete-log record.
    Delete(DeleteReason),
}

/// The identity the permission check runs against.
#[derive(Debug, Clone)]
pub struct Identity {
    pub euid: u32,
    pub egid: u32,
    pub groups: Vec<u32>,
}

impl Identity {
    /// The effective identity of the running process.
    #[cfg(unix)]
    pub fn current() -> Self {
        let euid = unsafe { libc::geteuid() };
        let egid = unsafe { libc::getegid() };
        let mut groups = vec![0 as libc::gid_t; 64];
        let n = unsafe { libc::getgroups(groups.len() as libc::c_int, groups.as_mut_ptr()) };
        let groups = if n > 0 {
            groups.truncate(n as usize);
            groups.into_iter().map(|g| g as u32).collect()
        } else {
            Vec::new()
        };
        Self {
            euid: euid as u32,
            egid: egid as u32,
            groups,
        }
    }

    #[cfg(not(unix))]
    pub fn current() -> Self {
        Self {
            euid: 0,
            egid: 0,
            groups: Vec::new(),
        }
    }
}

#[cfg(unix)]
fn can_read(meta: &Metadata, identity: &Identity) -> bool {
    use std::os::unix::fs::MetadataExt;
    let mode = meta.mode();
    if meta.uid() == identity.euid {
        mode & 0o400 != 0
    } else if meta.gid() == identity.egid || identity.groups.contains(&meta.gid()) {
        mode & 0o040 != 0
    } else {
        mode & 0o004 != 0
    }
}

#[cfg(not(unix))]
fn can_read(_meta: &Metadata, _identity: &Identity) -> bool {
    true
}

fn mtime_of(meta: &Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Evaluate one `(name, stat)` pair against the directory policy.
pub fn evaluate(
    entry: &DirectoryEntry,
    name: &str,
    meta: &Metadata,
    now: DateTime<Utc>,
    identity: &Identity,
    default_transfer_timeout: i64,
) -> GateDecision {
    let diff_time = (now - mtime_of(meta)).num_seconds();

    // Size/age gates apply only to locally-ingested directories.
    if entry.fsa_pos.is_none() {
        if let Some(pred) = entry.ignore_size {
            if pred.comparator.compare(meta.len() as i64, pred.size as i64) {
                return GateDecision::Leave(LeaveReason::SizeIgnored);
            }
        }
        if let Some(pred) = entry.ignore_file_time {
            if pred.comparator.compare(diff_time, pred.seconds) {
                return GateDecision::Leave(LeaveReason::AgeIgnored);
            }
        }
    }

    if !can_read(meta, identity) {
        return GateDecision::Leave(LeaveReason::NoReadPermission);
    }

    let disabled = entry
        .status
        .lock()
        .dir_flag
        .is_set(dir_flag::ALL_DISABLED);
    if disabled {
        // Remove policy (and retrieve-from-remote directories) still
        // evaluate the masks so matching files can be cleaned up.
        if entry.remove || entry.fsa_pos.is_some() {
            let is_wanted = entry.all_files || wanted(&entry.mask_groups, name);
            if is_wanted {
                return GateDecision::Delete(DeleteReason::HostDisabled);
            }
        }
        return GateDecision::Leave(LeaveReason::DirectoryDisabled);
    }

    let is_wanted = entry.all_files || wanted(&entry.mask_groups, name);
    if is_wanted {
        return GateDecision::Accept;
    }

    if entry.delete_unknown_files
        && (entry.unknown_file_time == UNKNOWN_FILE_TIME_IMMEDIATE
            || diff_time > entry.unknown_file_time.max(default_transfer_timeout))
    {
        return GateDecision::Delete(DeleteReason::UnknownFile);
    }
    GateDecision::Leave(LeaveReason::NotWanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AgePredicate, Comparator, SizePredicate};
    use afd_common::mask::MaskGroup;
    use std::fs;
    use std::io::Write;

    fn identity() -> Identity {
        Identity::current()
    }

    fn entry_with_masks(dir: &std::path::Path, masks: &[&str]) -> DirectoryEntry {
        let mut e = DirectoryEntry::new(7, "test-dir", dir);
        e.all_files = false;
        e.mask_groups = vec![MaskGroup::parse(masks)];
        e
    }

    fn touch(dir: &std::path::Path, name: &str, contents: &[u8]) -> fs::Metadata {
        let p = dir.join(name);
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(contents).unwrap();
        fs::metadata(&p).unwrap()
    }

    #[test]
    fn wanted_file_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let entry = entry_with_masks(tmp.path(), &["*.grb"]);
        let meta = touch(tmp.path(), "a.grb", b"x");
        let d = evaluate(&entry, "a.grb", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Accept);
    }

    #[test]
    fn unwanted_file_left_until_old() {
        let tmp = tempfile::tempdir().unwrap();
        let mut entry = entry_with_masks(tmp.path(), &["*.grb"]);
        entry.delete_unknown_files = true;
        entry.unknown_file_time = 3600;
        let meta = touch(tmp.path(), "a.txt", b"x");
        // Fresh files stay, even with deletion enabled.
        let d = evaluate(&entry, "a.txt", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Leave(LeaveReason::NotWanted));
        // An old file is deleted.
        let later = Utc::now() + chrono::Duration::seconds(7200);
        let d = evaluate(&entry, "a.txt", &meta, later, &identity(), 120);
        assert_eq!(d, GateDecision::Delete(DeleteReason::UnknownFile));
    }

    #[test]
    fn unknown_file_time_immediate_deletes_fresh_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut entry = entry_with_masks(tmp.path(), &["*.grb"]);
        entry.delete_unknown_files = true;
        entry.unknown_file_time = UNKNOWN_FILE_TIME_IMMEDIATE;
        let meta = touch(tmp.path(), "a.txt", b"x");
        let d = evaluate(&entry, "a.txt", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Delete(DeleteReason::UnknownFile));
    }

    #[test]
    fn size_predicate_ignores() {
        let tmp = tempfile::tempdir().unwrap();
        let mut entry = entry_with_masks(tmp.path(), &["*"]);
        entry.ignore_size = Some(SizePredicate {
            comparator: Comparator::Less,
            size: 10,
        });
        let meta = touch(tmp.path(), "small", b"abc");
        let d = evaluate(&entry, "small", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Leave(LeaveReason::SizeIgnored));

        let meta = touch(tmp.path(), "big", &[0u8; 32]);
        let d = evaluate(&entry, "big", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Accept);
    }

    #[test]
    fn age_predicate_ignores_young_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut entry = entry_with_masks(tmp.path(), &["*"]);
        entry.ignore_file_time = Some(AgePredicate {
            comparator: Comparator::Less,
            seconds: 60,
        });
        let meta = touch(tmp.path(), "young", b"x");
        let d = evaluate(&entry, "young", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Leave(LeaveReason::AgeIgnored));
    }

    #[test]
    fn gates_skipped_for_remote_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mut entry = entry_with_masks(tmp.path(), &["*"]);
        entry.fsa_pos = Some(3);
        entry.ignore_size = Some(SizePredicate {
            comparator: Comparator::Less,
            size: 1024,
        });
        let meta = touch(tmp.path(), "f", b"x");
        let d = evaluate(&entry, "f", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Accept);
    }

    #[test]
    fn disabled_directory_with_remove_deletes_wanted_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut entry = entry_with_masks(tmp.path(), &["*.grb"]);
        entry.remove = true;
        entry.status.lock().dir_flag.set(dir_flag::ALL_DISABLED);
        let meta = touch(tmp.path(), "a.grb", b"x");
        let d = evaluate(&entry, "a.grb", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Delete(DeleteReason::HostDisabled));

        // Unwanted files are left untouched.
        let meta = touch(tmp.path(), "a.txt", b"x");
        let d = evaluate(&entry, "a.txt", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Leave(LeaveReason::DirectoryDisabled));
    }

    #[test]
    fn disabled_directory_without_remove_leaves_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let mut entry = entry_with_masks(tmp.path(), &["*.grb"]);
        entry.remove = false;
        entry.status.lock().dir_flag.set(dir_flag::ALL_DISABLED);
        let meta = touch(tmp.path(), "a.grb", b"x");
        let d = evaluate(&entry, "a.grb", &meta, Utc::now(), &identity(), 120);
        assert_eq!(d, GateDecision::Leave(LeaveReason::DirectoryDisabled));
    }
}
