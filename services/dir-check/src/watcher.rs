//! Directory watcher loop.
//!
//! Kernel notifications feed per-directory batches into the ingestion
//! pipeline; periodic full scans catch anything notifications missed and
//! drive the retrieval-list sweep. Shutdown happens between batches.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use afd_common::status::dir_flag;
use ingestion::pipeline::{ingest_batch, IngestContext, WatchList};
use ingestion::DirectoryEntry;

/// How long to keep draining queued notifications before dispatching a
/// batch, so rapid producers end up in one batch instead of many.
const BATCH_SETTLE: Duration = Duration::from_millis(200);

pub struct DirWatcher {
    ctx: IngestContext,
    entries: Vec<DirectoryEntry>,
    scan_interval: Duration,
    next_scan: Vec<Instant>,
}

impl DirWatcher {
    pub fn new(ctx: IngestContext, entries: Vec<DirectoryEntry>, scan_interval: Duration) -> Self {
        let now = Instant::now();
        let next_scan = vec![now; entries.len()];
        Self {
            ctx,
            entries,
            scan_interval,
            next_scan,
        }
    }

    /// Run one full scan over every directory, then return. Used by the
    /// `--once` mode.
    pub fn scan_once(&mut self) -> Result<usize> {
        let mut total = 0;
        for index in 0..self.entries.len() {
            total += self.full_scan(index)?;
        }
        Ok(total)
    }

    /// Watch all directories until interrupted.
    pub async fn run(mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(err) => {
                    warn!(error = %err, "notification backend error");
                }
            })
            .context("cannot create the filesystem watcher")?;
        for entry in &self.entries {
            watcher
                .watch(&entry.path, RecursiveMode::NonRecursive)
                .with_context(|| format!("cannot watch {}", entry.path.display()))?;
            info!(dir = %entry.alias, path = %entry.path.display(), "watching");
        }

        loop {
            let due = self.earliest_scan();
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, finishing up");
                    break;
                }
                _ = tokio::time::sleep_until(due) => {
                    self.run_due_scans()?;
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let mut pending = self.names_of(event);
                    // Drain whatever else is already queued.
                    tokio::time::sleep(BATCH_SETTLE).await;
                    while let Ok(event) = rx.try_recv() {
                        for (index, names) in self.names_of(event) {
                            pending.entry(index).or_default().extend(names);
                        }
                    }
                    for (index, names) in pending {
                        self.dispatch(index, names, false)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn earliest_scan(&self) -> Instant {
        self.next_scan
            .iter()
            .copied()
            .min()
            .unwrap_or_else(Instant::now)
    }

    fn run_due_scans(&mut self) -> Result<()> {
        let now = Instant::now();
        for index in 0..self.entries.len() {
            if self.next_scan[index] <= now {
                self.full_scan(index)?;
            }
        }
        Ok(())
    }

    /// Map a notification event onto per-directory filename batches.
    fn names_of(&self, event: notify::Event) -> HashMap<usize, Vec<String>> {
        let mut out: HashMap<usize, Vec<String>> = HashMap::new();
        if !matches!(
            event.kind,
            notify::EventKind::Create(_)
                | notify::EventKind::Modify(_)
                | notify::EventKind::Any
        ) {
            return out;
        }
        for path in event.paths {
            let Some(parent) = path.parent() else { continue };
            let Some(index) = self.entries.iter().position(|e| e.path == parent) else {
                continue;
            };
            if let Some(name) = path.file_name() {
                out.entry(index)
                    .or_default()
                    .push(name.to_string_lossy().into_owned());
            }
        }
        out
    }

    fn full_scan(&mut self, index: usize) -> Result<usize> {
        let dir = self.entries[index].path.clone();
        let mut names = Vec::new();
        match std::fs::read_dir(&dir) {
            Ok(iter) => {
                for item in iter.flatten() {
                    names.push(item.file_name().to_string_lossy().into_owned());
                }
            }
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "cannot scan directory");
                self.next_scan[index] = Instant::now() + self.scan_interval;
                return Ok(0);
            }
        }
        self.dispatch(index, names, true)
    }

    fn dispatch(&mut self, index: usize, mut names: Vec<String>, full_scan: bool) -> Result<usize> {
        dedup_names(&mut names);
        let entry = &self.entries[index];
        debug!(dir = %entry.alias, files = names.len(), full_scan, "dispatching batch");
        let mut batch = WatchList::new(names, full_scan);
        let published = ingest_batch(&mut self.ctx, entry, &mut batch, Utc::now())
            .with_context(|| format!("batch for {} failed", entry.alias))?;

        let mut next = Instant::now() + self.scan_interval;
        if let Some(pull_in) = batch.rescan_pull_in {
            next = next.checked_sub(pull_in).unwrap_or(next);
        }
        {
            let mut status = entry.status.lock();
            if status.dir_flag.is_set(dir_flag::INOTIFY_NEEDS_SCAN) {
                status.dir_flag.clear(dir_flag::INOTIFY_NEEDS_SCAN);
                next = Instant::now();
            }
        }
        self.next_scan[index] = next;
        Ok(published)
    }
}

/// Merged notification batches can repeat a name non-adjacently.
fn dedup_names(names: &mut Vec<String>) {
    names.sort();
    names.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_common::events::TracingEventSink;
    use std::fs;
    use std::path::PathBuf;

    fn watcher_with_one_dir(tmp: &std::path::Path) -> (DirWatcher, PathBuf) {
        let work = tmp.join("work");
        let src = tmp.join("in");
        fs::create_dir_all(&work).unwrap();
        fs::create_dir_all(&src).unwrap();
        let ctx = IngestContext::new(
            &work,
            Box::new(TracingEventSink),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        let mut entry = DirectoryEntry::new(1, "t", &src);
        entry.in_same_filesystem = true;
        let watcher = DirWatcher::new(ctx, vec![entry], Duration::from_secs(60));
        (watcher, src)
    }

    #[test]
    fn scan_once_publishes_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut watcher, src) = watcher_with_one_dir(tmp.path());
        fs::write(src.join("a"), b"1").unwrap();
        fs::write(src.join("b"), b"22").unwrap();
        assert_eq!(watcher.scan_once().unwrap(), 2);
        assert!(!src.join("a").exists());
    }

    #[test]
    fn interleaved_duplicate_names_collapse() {
        let mut names = ["a", "b", "a", "b", "a"]
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        dedup_names(&mut names);
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn event_names_map_to_the_owning_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let (watcher, src) = watcher_with_one_dir(tmp.path());
        let event = notify::Event {
            kind: notify::EventKind::Create(notify::event::CreateKind::File),
            paths: vec![src.join("fresh"), tmp.path().join("elsewhere").join("x")],
            attrs: Default::default(),
        };
        let map = watcher.names_of(event);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&0], vec!["fresh".to_string()]);
    }
}
