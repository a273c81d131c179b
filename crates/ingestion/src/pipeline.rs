//! The batch ingestion pipeline.
//!
//! [`ingest_batch`] walks one notification batch for one directory:
//! gating, duplicate check, retrieval-list bookkeeping, staging and
//! optional bulletin extraction, then the per-batch status and event
//! epilogue. The surrounding watcher only collects names and calls in.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use afd_common::events::{EventKind, EventSink};
use afd_common::status::dir_flag;
use bulletin_parser::{BulletinConfigEntry, Extractor, ReportConfigEntry};

use crate::chown::ChownCapability;
use crate::counter::CounterFile;
use crate::dupcheck::{self, DupStore};
use crate::entry::DirectoryEntry;
use crate::error::{IngestionError, Result};
use crate::gating::{self, GateDecision, Identity};
use crate::logs::{DeleteReason, DeleteRecord, DistributionType, LogSinks, ProductionRecordLine, ReceiveLevel};
use crate::retrieval::RetrievalList;
use crate::staging::{PublishOutcome, StagingPublisher};

/// How much earlier the next scan runs after an end-character mismatch.
pub const RESCAN_PULL_IN: Duration = Duration::from_secs(5);

const DEFAULT_TRANSFER_TIMEOUT: i64 = 120;

/// One notification batch for one directory.
#[derive(Debug)]
pub struct WatchList {
    pub names: Vec<String>,
    /// The batch came from a full directory scan, so names missing from
    /// it really are gone and the retrieval list may be swept.
    pub from_full_scan: bool,
    /// Set when a file was left behind half-written and the next scan
    /// should be pulled in.
    pub rescan_pull_in: Option<Duration>,
}

impl WatchList {
    pub fn new(names: Vec<String>, from_full_scan: bool) -> Self {
        Self {
            names,
            from_full_scan,
            rescan_pull_in: None,
        }
    }
}

/// Everything the pipeline needs besides the directory entry itself.
pub struct IngestContext {
    pub work_dir: PathBuf,
    pub sinks: LogSinks,
    pub counter: CounterFile,
    pub events: Box<dyn EventSink>,
    pub chown: ChownCapability,
    pub staging: StagingPublisher,
    pub identity: Identity,
    pub bcdb: Vec<BulletinConfigEntry>,
    pub rcdb: Vec<ReportConfigEntry>,
    pub default_transfer_timeout: i64,
    pub maintainer: String,
}

impl IngestContext {
    pub fn new(
        work_dir: &Path,
        events: Box<dyn EventSink>,
        bcdb: Vec<BulletinConfigEntry>,
        rcdb: Vec<ReportConfigEntry>,
    ) -> Result<Self> {
        Ok(Self {
            work_dir: work_dir.to_path_buf(),
            sinks: LogSinks::open(work_dir)?,
            counter: CounterFile::open(work_dir)?,
            events,
            chown: ChownCapability::new(),
            staging: StagingPublisher::new(work_dir),
            identity: Identity::current(),
            bcdb,
            rcdb,
            default_transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            maintainer: String::new(),
        })
    }
}

struct BatchState {
    staging: Option<(PathBuf, u32)>,
    published_files: u32,
    published_bytes: u64,
    error_in_batch: bool,
}

/// Ingest one batch. Returns the number of files published to staging.
pub fn ingest_batch(
    ctx: &mut IngestContext,
    entry: &DirectoryEntry,
    batch: &mut WatchList,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut dup_store = match &entry.dup_check {
        Some(_) => Some(DupStore::open(&ctx.work_dir, entry.dir_id)?),
        None => None,
    };
    let use_list = !entry.stupid_mode && (!entry.remove || entry.fsa_pos.is_some());
    let mut list = if use_list {
        Some(RetrievalList::open(&ctx.work_dir, entry.dir_id)?)
    } else {
        None
    };

    let mut state = BatchState {
        staging: None,
        published_files: 0,
        published_bytes: 0,
        error_in_batch: false,
    };

    // The watch list is released here; the batch keeps only its flags.
    let names = std::mem::take(&mut batch.names);
    for name in &names {
        if afd_common::mask::wanted(&entry.lock_masks, name) {
            continue;
        }
        let full_path = entry.path.join(name);
        let meta = match fs::metadata(&full_path) {
            Ok(m) => m,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %name, "vanished before stat, producer raced us");
                continue;
            }
            Err(err) => {
                record_error(ctx, entry, now, &format!("cannot stat {name}: {err}"))?;
                state.error_in_batch = true;
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }

        match gating::evaluate(
            entry,
            name,
            &meta,
            now,
            &ctx.identity,
            ctx.default_transfer_timeout,
        ) {
            GateDecision::Leave(_) => continue,
            GateDecision::Delete(reason) => {
                delete_file(ctx, entry, now, &full_path, name, meta.len(), reason)?;
                continue;
            }
            GateDecision::Accept => {}
        }

        let mtime = file_mtime(&meta);
        let list_pos = list.as_mut().map(|l| l.check(name, mtime, meta.len()));
        if list_pos.is_some_and(|p| p.already_retrieved) {
            continue;
        }

        let mut dup_fp = None;
        if let (Some(policy), Some(store)) = (&entry.dup_check, dup_store.as_mut()) {
            if !policy.timeout.is_zero() {
                let fp = dupcheck::fingerprint(policy, name, meta.len(), &full_path)?;
                let timeout = policy.timeout.as_secs() as i64;
                if store.check(fp, now.timestamp(), timeout) {
                    if policy.actions.warn {
                        ctx.sinks.receive(
                            ReceiveLevel::Warn,
                            now,
                            entry.dir_id,
                            &format!("File {name} is duplicate"),
                        )?;
                    }
                    if policy.actions.delete {
                        delete_file(
                            ctx,
                            entry,
                            now,
                            &full_path,
                            name,
                            meta.len(),
                            DeleteReason::DupInput,
                        )?;
                        continue;
                    }
                    if policy.actions.store {
                        store_duplicate(ctx, entry, now, &full_path, name, meta.len())?;
                        continue;
                    }
                    // Neither delete nor store, the duplicate passes.
                }
                dup_fp = Some(fp);
            }
        }

        let (staging_dir, unique) = match state.staging.clone() {
            Some(existing) => existing,
            None => {
                let unique = ctx.counter.next()?;
                let created = ctx.staging.create_name(
                    entry.priority,
                    now.timestamp(),
                    entry.dir_id,
                    unique,
                )?;
                if created.slept {
                    batch.from_full_scan = false;
                }
                state.staging = Some((created.path.clone(), unique));
                (created.path, unique)
            }
        };

        match ctx.staging.publish(entry, &full_path, name, &staging_dir) {
            Ok(PublishOutcome::Published(size)) => {
                ctx.chown.apply(&staging_dir.join(name), file_uid(&meta));
                if let (Some(list), Some(pos)) = (list.as_mut(), list_pos) {
                    list.mark_retrieved(pos.index);
                }
                ctx.sinks.input(now, entry.dir_id, unique, name, size)?;
                state.published_files += 1;
                state.published_bytes += size;

                if entry.extract.is_some() {
                    extract_staged(ctx, entry, now, &mut state, &staging_dir, name, size, unique)?;
                }
            }
            Ok(PublishOutcome::EndCharMismatch) => {
                batch.rescan_pull_in = Some(RESCAN_PULL_IN);
                if let (Some(store), Some(fp)) = (dup_store.as_mut(), dup_fp) {
                    store.remove(fp);
                }
            }
            Err(err) => {
                record_error(ctx, entry, now, &format!("cannot publish {name}: {err}"))?;
                state.error_in_batch = true;
                if let (Some(store), Some(fp)) = (dup_store.as_mut(), dup_fp) {
                    store.remove(fp);
                }
            }
        }

        if state.published_files >= entry.max_copied_files
            || state.published_bytes >= entry.max_copied_file_size
        {
            let mut status = entry.status.lock();
            status.dir_flag.set(dir_flag::MAX_COPIED);
            status.dir_flag.set(dir_flag::INOTIFY_NEEDS_SCAN);
            break;
        }
    }

    if let Some(mut list) = list {
        if batch.from_full_scan {
            list.rm_removed_files();
        }
        list.close()?;
    }
    if let Some(mut store) = dup_store {
        if let Some(policy) = &entry.dup_check {
            store.prune(now.timestamp(), policy.timeout.as_secs() as i64);
        }
        store.persist()?;
    }

    finish_batch(ctx, entry, now, &state)?;
    Ok(state.published_files as usize)
}

fn file_mtime(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .map(|t| DateTime::<Utc>::from(t).timestamp())
        .unwrap_or(0)
}

#[cfg(unix)]
fn file_uid(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.uid()
}

#[cfg(not(unix))]
fn file_uid(_meta: &fs::Metadata) -> u32 {
    0
}

/// Unlink a rejected file and write the delete-log (and, for policy
/// deletions, distribution-log) records.
fn delete_file(
    ctx: &mut IngestContext,
    entry: &DirectoryEntry,
    now: DateTime<Utc>,
    path: &Path,
    name: &str,
    size: u64,
    reason: DeleteReason,
) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            record_error(ctx, entry, now, &format!("cannot delete {name}: {err}"))?;
            return Ok(());
        }
    }
    ctx.sinks.delete(
        now,
        &DeleteRecord {
            reason,
            dir_id: entry.dir_id,
            job_id: 0,
            split: 0,
            unique: 0,
            size,
            name,
            info: reason.as_str(),
        },
    )?;
    let dist_type = match reason {
        DeleteReason::HostDisabled => Some(DistributionType::Disabled),
        DeleteReason::DupInput => Some(DistributionType::Dupcheck),
        _ => None,
    };
    if let Some(dist_type) = dist_type {
        ctx.sinks
            .distribution(now, dist_type, entry.dir_id, 0, name, size)?;
    }
    Ok(())
}

/// Move a duplicate aside per the store policy. A failure to provide the
/// store directory degrades to deletion.
fn store_duplicate(
    ctx: &mut IngestContext,
    entry: &DirectoryEntry,
    now: DateTime<Utc>,
    path: &Path,
    name: &str,
    size: u64,
) -> Result<()> {
    let dst = dupcheck::store_path(&ctx.work_dir, entry.dir_id, name);
    let store_dir = match dst.parent() {
        Some(dir) => dir,
        None => return delete_file(ctx, entry, now, path, name, size, DeleteReason::DupStoreFailed),
    };
    if let Err(err) = fs::create_dir_all(store_dir) {
        warn!(dir = %store_dir.display(), error = %err, "cannot create duplicate store");
        return delete_file(ctx, entry, now, path, name, size, DeleteReason::DupStoreFailed);
    }
    match fs::rename(path, &dst) {
        Ok(()) => Ok(()),
        Err(err) if err.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(path, &dst).map_err(|source| IngestionError::Io {
                path: dst.clone(),
                source,
            })?;
            fs::remove_file(path).map_err(|source| IngestionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(())
        }
        Err(err) => {
            warn!(file = name, error = %err, "cannot move duplicate to store");
            delete_file(ctx, entry, now, path, name, size, DeleteReason::DupStoreFailed)
        }
    }
}

/// Run the bulletin extractor over one freshly staged file, replacing
/// the staged original with its artefacts in the aggregate counters.
#[allow(clippy::too_many_arguments)]
fn extract_staged(
    ctx: &mut IngestContext,
    entry: &DirectoryEntry,
    now: DateTime<Utc>,
    state: &mut BatchState,
    staging_dir: &Path,
    name: &str,
    size: u64,
    unique: u32,
) -> Result<()> {
    let options = match &entry.extract {
        Some(o) => o.clone(),
        None => return Ok(()),
    };
    let counter = ctx.counter.clone();
    let mut extractor =
        Extractor::new(options, &ctx.bcdb, &ctx.rcdb).with_unique_counter(Box::new(move || {
            match counter.next() {
                Ok(n) => n,
                Err(err) => {
                    error!("advancing the unique counter failed: {err}");
                    0
                }
            }
        }));
    let staged = staging_dir.join(name);
    let outcome = extractor.extract(&staged, staging_dir);
    drop(extractor);
    match outcome {
        Ok(summary) => {
            state.published_files -= 1;
            state.published_bytes -= size;
            state.published_files += summary.files_produced;
            state.published_bytes += summary.total_bytes;
            for record in &summary.records {
                ctx.sinks.production(&ProductionRecordLine {
                    creation_secs: now.timestamp(),
                    unique,
                    split: 0,
                    job_id: 0,
                    dir_id: entry.dir_id,
                    elapsed_secs: record.elapsed_secs,
                    original_name: name,
                    original_size: size,
                    new_name: &record.name,
                    new_size: record.size,
                })?;
            }
        }
        Err(err) => {
            record_error(
                ctx,
                entry,
                now,
                &format!("extraction of {name} failed: {err}"),
            )?;
            state.error_in_batch = true;
            // An early failure can leave the staged original in place;
            // only discount it once it is actually gone.
            if !staged.exists() {
                state.published_files -= 1;
                state.published_bytes -= size;
            }
        }
    }
    Ok(())
}

fn record_error(
    ctx: &mut IngestContext,
    entry: &DirectoryEntry,
    now: DateTime<Utc>,
    message: &str,
) -> Result<()> {
    if ctx.maintainer.is_empty() {
        error!(dir = %entry.alias, "{message}");
    } else {
        error!(dir = %entry.alias, maintainer = %ctx.maintainer, "{message}");
    }
    ctx.sinks
        .receive(ReceiveLevel::Error, now, entry.dir_id, message)?;
    let mut status = entry.status.lock();
    status.error_counter += 1;
    if !status.dir_flag.is_set(dir_flag::DIR_ERROR_SET) {
        status.dir_flag.set(dir_flag::DIR_ERROR_SET);
        ctx.events.emit(EventKind::ErrorStart, &entry.alias);
    }
    Ok(())
}

/// The per-batch epilogue: summary lines, event transitions, aggregate
/// counters and the chown-capability release.
fn finish_batch(
    ctx: &mut IngestContext,
    entry: &DirectoryEntry,
    now: DateTime<Utc>,
    state: &BatchState,
) -> Result<()> {
    let mut pending_events: Vec<EventKind> = Vec::new();
    {
        let mut status = entry.status.lock();
        if state.published_files > 0 {
            if status.dir_flag.is_set(dir_flag::INFO_TIME_REACHED) {
                status.dir_flag.clear(dir_flag::INFO_TIME_REACHED);
                pending_events.push(EventKind::InfoTimeUnset);
            }
            if status.dir_flag.is_set(dir_flag::WARN_TIME_REACHED) {
                status.dir_flag.clear(dir_flag::WARN_TIME_REACHED);
                pending_events.push(EventKind::WarnTimeUnset);
            }
            status.files_received += u64::from(state.published_files);
            status.bytes_received += state.published_bytes;
            status.last_retrieval = Some(now);
        }
        if status.error_counter > 0 && entry.fsa_pos.is_none() && !state.error_in_batch {
            status.error_counter = 0;
            status.dir_flag.clear(dir_flag::DIR_ERROR_SET);
            pending_events.push(EventKind::ErrorEnd);
        }
        // Unknowable in notification-driven mode, reset every batch.
        status.files_in_dir = 0;
        status.bytes_in_dir = 0;
    }
    for kind in pending_events {
        ctx.events.emit(kind, &entry.alias);
    }

    if state.published_files > 0 {
        let verb = if entry.remove { "moved" } else { "copied" };
        ctx.sinks.receive(
            ReceiveLevel::Info,
            now,
            entry.dir_id,
            &format!(
                "Received {} files with {} bytes ({verb})",
                state.published_files, state.published_bytes
            ),
        )?;
    } else if !state.error_in_batch {
        ctx.sinks
            .receive(ReceiveLevel::Info, now, entry.dir_id, "Received 0 files")?;
    }

    ctx.chown.release();
    Ok(())
}
