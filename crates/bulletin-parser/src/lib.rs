//! WMO bulletin extraction.
//!
//! This crate demultiplexes a bulletin container file (many framing
//! variants, see [`framing::BulletinFormat`]) into its constituent
//! bulletins, derives an output filename from each bulletin heading and
//! optionally slices each bulletin into per-station reports. Each
//! extracted unit is written as its own file into a destination
//! directory; the input file is unlinked before any output is written.

pub mod config;
pub mod error;
pub mod framing;
pub mod heading;
pub mod report;
pub mod writeout;

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use afd_common::mask::{wanted, MaskGroup};

pub use config::{BulletinConfigEntry, BulletinType, ReportConfigEntry, ReportType, StationIdKind};
pub use error::{ExtractError, Result};
use framing::{split_frames, BulletinFormat, Frame};
use heading::DerivedHeading;
use report::{extract_reports, ReportOutcome};
use writeout::{assemble_bulletin, assemble_report, AssembleOptions};

/// Options controlling one extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub format: BulletinFormat,
    /// Slice bulletins into per-station report files.
    pub extract_reports: bool,
    /// Consult the bulletin configuration table for each heading.
    pub use_external_rules: bool,
    /// Splice a YYYYMM date in front of the day-of-month group.
    pub add_full_date: bool,
    pub add_soh_etx: bool,
    pub remove_wmo_header: bool,
    /// Prepend a `<derived-name> <original-name>` line.
    pub add_bul_orig_file: bool,
    /// Replicate the SYNOP extra heading into each report.
    pub extra_report_heading: bool,
    /// Append `#<wid>.<cfg_wid>#<BTIME>#<ITIME>#<bulname>#<orig>`.
    pub add_additional_info: bool,
    /// Append `-<crc32c hex>` over the report body.
    pub add_crc_checksum: bool,
    /// Append `-<4 hex digit counter>`.
    pub add_unique_number: bool,
    /// Client-supplied filename filter; empty accepts everything.
    pub filter: Vec<MaskGroup>,
}

/// One produced artefact, for the production log.
#[derive(Debug, Clone)]
pub struct ProductionRecord {
    pub name: String,
    pub size: u64,
    pub elapsed_secs: f64,
}

/// Result of one extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSummary {
    pub files_produced: u32,
    pub total_bytes: u64,
    pub records: Vec<ProductionRecord>,
}

/// Bulletin extractor bound to the loaded configuration tables.
pub struct Extractor<'a> {
    options: ExtractOptions,
    bcdb: &'a [BulletinConfigEntry],
    rcdb: &'a [ReportConfigEntry],
    next_unique: Option<Box<dyn FnMut() -> u32 + Send + 'a>>,
}

impl<'a> Extractor<'a> {
    pub fn new(
        options: ExtractOptions,
        bcdb: &'a [BulletinConfigEntry],
        rcdb: &'a [ReportConfigEntry],
    ) -> Self {
        Self {
            options,
            bcdb,
            rcdb,
            next_unique: None,
        }
    }

    /// Provide the process-wide unique-number source, required when
    /// `add_unique_number` is set.
    pub fn with_unique_counter(mut self, counter: Box<dyn FnMut() -> u32 + Send + 'a>) -> Self {
        self.next_unique = Some(counter);
        self
    }

    /// Extract a bulletin container file into `dest_dir`.
    ///
    /// The input file is unlinked before any output is written.
    pub fn extract(&mut self, path: &Path, dest_dir: &Path) -> Result<ExtractionSummary> {
        if self.options.add_unique_number && self.next_unique.is_none() {
            return Err(ExtractError::InvalidOptions(
                "unique numbers requested without a counter source".to_string(),
            ));
        }

        let metadata = std::fs::metadata(path)?;
        let mtime: DateTime<Utc> = metadata.modified()?.into();
        let mode = file_mode(&metadata);
        let orig_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let data = std::fs::read(path)?;
        if data.is_empty() {
            std::fs::remove_file(path)?;
            return Err(ExtractError::EmptyInput);
        }
        std::fs::remove_file(path)?;

        self.extract_data(&data, mtime, &orig_name, mode, dest_dir)
    }

    /// Extract from in-memory bytes. The testable core of [`extract`].
    pub fn extract_data(
        &mut self,
        data: &[u8],
        mtime: DateTime<Utc>,
        orig_name: &str,
        mode: u32,
        dest_dir: &Path,
    ) -> Result<ExtractionSummary> {
        let mut summary = ExtractionSummary::default();

        for frame in split_frames(data, self.options.format) {
            if frame.bytes.is_empty() {
                continue;
            }
            let started = Instant::now();

            let derived = match heading::derive(frame.bytes, self.options.add_full_date, mtime) {
                Some(d) => d,
                None => {
                    warn!(original = %orig_name, "empty bulletin heading, frame discarded");
                    continue;
                }
            };

            let mut rcdb_entry: Option<&ReportConfigEntry> = None;
            if self.options.use_external_rules {
                match config::find_bulletin_entry(self.bcdb, &derived.ttaaii, &derived.cccc) {
                    Some((_, entry)) => {
                        if entry.bulletin_type == BulletinType::Ignore {
                            debug!(bulletin = %derived.name, "bulletin configured as ignore, discarded");
                            continue;
                        }
                        rcdb_entry = entry.rcdb_index.and_then(|i| self.rcdb.get(i));
                    }
                    None => {
                        debug!(bulletin = %derived.name, "no bulletin configuration entry");
                    }
                }
            }

            if !self.options.filter.is_empty() && !wanted(&self.options.filter, &derived.name) {
                debug!(bulletin = %derived.name, "bulletin filtered out");
                continue;
            }

            if self.options.extract_reports {
                match extract_reports(frame.bytes, &derived, rcdb_entry) {
                    ReportOutcome::Reports(set) => {
                        self.write_reports(
                            &set, &derived, rcdb_entry, orig_name, mode, dest_dir, started,
                            &mut summary,
                        )?;
                        continue;
                    }
                    ReportOutcome::Declined => {
                        // Fall through to the bulletin-level write.
                    }
                }
            }

            self.write_bulletin(
                &frame, &derived, orig_name, mode, dest_dir, started, &mut summary,
            )?;
        }

        Ok(summary)
    }

    fn assemble_options(&self) -> AssembleOptions {
        AssembleOptions {
            add_soh_etx: self.options.add_soh_etx,
            remove_wmo_header: self.options.remove_wmo_header,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_bulletin(
        &mut self,
        frame: &Frame<'_>,
        derived: &DerivedHeading,
        orig_name: &str,
        mode: u32,
        dest_dir: &Path,
        started: Instant,
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        let prefix = self
            .options
            .add_bul_orig_file
            .then_some((derived.name.as_str(), orig_name));
        let out = assemble_bulletin(frame, derived.header_start, prefix, self.assemble_options());
        if out.is_empty() {
            return Ok(());
        }

        let mut name = derived.name.clone();
        if self.options.add_unique_number {
            if let Some(next) = self.next_unique.as_mut() {
                name.push_str(&format!("-{:04x}", next() & 0xffff));
            }
        }

        self.write_file(&name, &out, mode, dest_dir, started, summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_reports(
        &mut self,
        set: &report::ReportSet<'_>,
        derived: &DerivedHeading,
        rcdb_entry: Option<&ReportConfigEntry>,
        orig_name: &str,
        mode: u32,
        dest_dir: &Path,
        started: Instant,
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        let heading = self
            .options
            .extra_report_heading
            .then_some(set.extra_heading)
            .flatten();

        for rep in &set.reports {
            let out = assemble_report(rep.body, heading, self.assemble_options());
            if out.is_empty() {
                continue;
            }

            let mut name = format!("{}-{}", derived.name, rep.station);
            if self.options.add_additional_info {
                let entry_wid = rcdb_entry.map(|e| e.wid.as_str()).unwrap_or("");
                let btime = rcdb_entry.map(|e| e.btime.as_str()).unwrap_or("");
                let itime = rcdb_entry.map(|e| e.itime.as_str()).unwrap_or("");
                name.push_str(&format!(
                    "#{}.{}#{}#{}#{}#{}",
                    set.wid.unwrap_or('0'),
                    entry_wid,
                    btime,
                    itime,
                    derived.name,
                    orig_name
                ));
            }
            if self.options.add_crc_checksum {
                let mut sum = 0;
                if let Some(h) = heading {
                    sum = crc32c::crc32c_append(sum, h);
                }
                sum = crc32c::crc32c_append(sum, rep.body);
                name.push_str(&format!("-{sum:x}"));
            }
            if self.options.add_unique_number {
                if let Some(next) = self.next_unique.as_mut() {
                    name.push_str(&format!("-{:04x}", next() & 0xffff));
                }
            }

            self.write_file(&name, &out, mode, dest_dir, started, summary)?;
        }
        Ok(())
    }

    fn write_file(
        &self,
        name: &str,
        contents: &[u8],
        mode: u32,
        dest_dir: &Path,
        started: Instant,
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        let dest = dest_dir.join(name);
        std::fs::write(&dest, contents)?;
        set_file_mode(&dest, mode)?;

        summary.files_produced += 1;
        summary.total_bytes += contents.len() as u64;
        summary.records.push(ProductionRecord {
            name: name.to_string(),
            size: contents.len() as u64,
            elapsed_secs: started.elapsed().as_secs_f64(),
        });
        Ok(())
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
