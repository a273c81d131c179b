//! Write-only log sinks.
//!
//! All sinks are line-oriented append files under `<work>/log/`, opened
//! lazily on first record. Fields within a line are space separated with
//! identifiers in hex, matching what the downstream log browsers expect.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{IngestionError, Result};

/// Why a file was unlinked instead of published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    UnknownFile,
    HostDisabled,
    DupInput,
    DupStoreFailed,
}

impl DeleteReason {
    pub fn code(self) -> u32 {
        match self {
            DeleteReason::UnknownFile => 0x05,
            DeleteReason::HostDisabled => 0x0c,
            DeleteReason::DupInput => 0x0e,
            DeleteReason::DupStoreFailed => 0x0f,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeleteReason::UnknownFile => "unknown file",
            DeleteReason::HostDisabled => "host disabled",
            DeleteReason::DupInput => "duplicate input",
            DeleteReason::DupStoreFailed => "duplicate store failed",
        }
    }
}

/// Distribution-log record type for files dropped instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionType {
    Dupcheck,
    Disabled,
}

impl DistributionType {
    fn code(self) -> u32 {
        match self {
            DistributionType::Dupcheck => 4,
            DistributionType::Disabled => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ReceiveLevel {
    fn as_str(self) -> &'static str {
        match self {
            ReceiveLevel::Debug => "D",
            ReceiveLevel::Info => "I",
            ReceiveLevel::Warn => "W",
            ReceiveLevel::Error => "E",
        }
    }
}

/// One record in the delete log.
#[derive(Debug)]
pub struct DeleteRecord<'a> {
    pub reason: DeleteReason,
    pub dir_id: u32,
    pub job_id: u32,
    pub split: u32,
    pub unique: u32,
    pub size: u64,
    pub name: &'a str,
    pub info: &'a str,
}

/// One record in the production log, written per extracted artefact.
#[derive(Debug)]
pub struct ProductionRecordLine<'a> {
    pub creation_secs: i64,
    pub unique: u32,
    pub split: u32,
    pub job_id: u32,
    pub dir_id: u32,
    pub elapsed_secs: f64,
    pub original_name: &'a str,
    pub original_size: u64,
    pub new_name: &'a str,
    pub new_size: u64,
}

#[derive(Debug)]
struct LineSink {
    path: PathBuf,
    file: Option<File>,
}

impl LineSink {
    fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|source| IngestionError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{line}").map_err(|source| IngestionError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// The full set of sinks one watcher process writes to.
#[derive(Debug)]
pub struct LogSinks {
    receive: LineSink,
    delete: LineSink,
    production: LineSink,
    input: LineSink,
    distribution: LineSink,
}

impl LogSinks {
    pub fn open(work_dir: &Path) -> Result<Self> {
        let log_dir = work_dir.join("log");
        fs::create_dir_all(&log_dir).map_err(|source| IngestionError::Io {
            path: log_dir.clone(),
            source,
        })?;
        Ok(Self {
            receive: LineSink::new(log_dir.join("RECEIVE_LOG")),
            delete: LineSink::new(log_dir.join("DELETE_LOG")),
            production: LineSink::new(log_dir.join("PRODUCTION_LOG")),
            input: LineSink::new(log_dir.join("INPUT_LOG")),
            distribution: LineSink::new(log_dir.join("DISTRIBUTION_LOG")),
        })
    }

    pub fn receive(
        &mut self,
        level: ReceiveLevel,
        now: DateTime<Utc>,
        dir_id: u32,
        message: &str,
    ) -> Result<()> {
        let line = format!(
            "{} {} {} @{:x}",
            now.timestamp(),
            level.as_str(),
            message,
            dir_id
        );
        self.receive.write_line(&line)
    }

    pub fn delete(&mut self, now: DateTime<Utc>, record: &DeleteRecord<'_>) -> Result<()> {
        // The host-name field of a deletion without a target host is the
        // reason code itself, prefixed with '-'.
        let line = format!(
            "{} -{:x} {:x} {:x} {:x} {:x} {} {} {}",
            now.timestamp(),
            record.reason.code(),
            record.dir_id,
            record.job_id,
            record.split,
            record.unique,
            record.size,
            record.name,
            record.info
        );
        self.delete.write_line(&line)
    }

    pub fn production(
        &mut self,
        record: &ProductionRecordLine<'_>,
    ) -> Result<()> {
        let (cpu_secs, cpu_usecs) = cpu_usage();
        let line = format!(
            "{}_{:x}_{:x} {:x} {:x} {:.2} {}.{:06} {},{}|{},{}",
            record.creation_secs,
            record.unique,
            record.split,
            record.job_id,
            record.dir_id,
            record.elapsed_secs,
            cpu_secs,
            cpu_usecs,
            record.original_name,
            record.original_size,
            record.new_name,
            record.new_size
        );
        self.production.write_line(&line)
    }

    pub fn input(
        &mut self,
        now: DateTime<Utc>,
        dir_id: u32,
        unique: u32,
        name: &str,
        size: u64,
    ) -> Result<()> {
        let line = format!("{} {:x} {:x} {} {}", now.timestamp(), dir_id, unique, size, name);
        self.input.write_line(&line)
    }

    pub fn distribution(
        &mut self,
        now: DateTime<Utc>,
        dist_type: DistributionType,
        dir_id: u32,
        unique: u32,
        name: &str,
        size: u64,
    ) -> Result<()> {
        // One recipient, dummy job id, zero processing cycles.
        let line = format!(
            "{} {} {:x} {:x} {} {} {} 1 0 0",
            now.timestamp(),
            dist_type.code(),
            dir_id,
            unique,
            name,
            name.len(),
            size
        );
        self.distribution.write_line(&line)
    }
}

/// Accumulated CPU time of the process as (seconds, microseconds).
#[cfg(unix)]
fn cpu_usage() -> (i64, i64) {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return (0, 0);
    }
    let secs = usage.ru_utime.tv_sec + usage.ru_stime.tv_sec;
    let usecs = usage.ru_utime.tv_usec + usage.ru_stime.tv_usec;
    (secs as i64, usecs as i64 % 1_000_000)
}

#[cfg(not(unix))]
fn cpu_usage() -> (i64, i64) {
    (0, 0)
}
