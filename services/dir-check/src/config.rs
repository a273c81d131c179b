//! dir-check configuration.
//!
//! One YAML file describes the work directory, the bulletin/report
//! tables and every monitored directory with its policy knobs. The
//! work directory and maintainer can also come from the environment
//! (`AFD_WORK_DIR`, `AFD_MAINTAINER`) when the YAML omits them.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use afd_common::mask::MaskGroup;
use bulletin_parser::framing::BulletinFormat;
use bulletin_parser::{BulletinConfigEntry, ExtractOptions, ReportConfigEntry};
use ingestion::entry::{
    AgePredicate, Comparator, DupActions, DupCheckPolicy, DupFingerprint, SizePredicate,
};
use ingestion::DirectoryEntry;

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DirCheckConfig {
    /// AFD work directory holding pool, logs, counter and bookkeeping.
    pub work_dir: Option<PathBuf>,

    /// Contact string shown in warning log lines.
    #[serde(default)]
    pub maintainer: Option<String>,

    /// Transfer timeout fallback used by the unknown-files policy.
    #[serde(default = "default_transfer_timeout")]
    pub default_transfer_timeout: i64,

    /// Seconds between full directory scans.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Bulletin configuration table (bcdb).
    #[serde(default)]
    pub bulletins: Vec<BulletinConfigEntry>,

    /// Report configuration table (rcdb).
    #[serde(default)]
    pub reports: Vec<ReportConfigEntry>,

    /// Monitored source directories.
    pub directories: Vec<DirectoryConfig>,
}

fn default_transfer_timeout() -> i64 {
    120
}

fn default_scan_interval() -> u64 {
    60
}

fn default_priority() -> char {
    '9'
}

fn default_true() -> bool {
    true
}

fn default_max_copied_files() -> u32 {
    100
}

fn default_max_copied_file_size() -> u64 {
    100 * 1024 * 1024
}

/// Size or age predicate as written in the configuration file.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PredicateConfig {
    pub comparator: Comparator,
    pub value: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DupCheckConfig {
    pub timeout_secs: u64,
    pub fingerprint: DupFingerprint,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    pub warn: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    /// Framing variant; see [`parse_format`] for the accepted names.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub extract_reports: bool,
    #[serde(default)]
    pub use_external_rules: bool,
    #[serde(default)]
    pub add_full_date: bool,
    #[serde(default)]
    pub add_soh_etx: bool,
    #[serde(default)]
    pub remove_wmo_header: bool,
    #[serde(default)]
    pub add_bul_orig_file: bool,
    #[serde(default)]
    pub extra_report_heading: bool,
    #[serde(default)]
    pub add_additional_info: bool,
    #[serde(default)]
    pub add_crc_checksum: bool,
    #[serde(default)]
    pub add_unique_number: bool,
    /// Mask groups applied to derived bulletin names.
    #[serde(default)]
    pub filter: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub id: u32,
    pub alias: String,
    pub path: PathBuf,
    #[serde(default = "default_priority")]
    pub priority: char,
    /// Mask groups; an empty list means all files are wanted.
    #[serde(default)]
    pub masks: Vec<Vec<String>>,
    #[serde(default)]
    pub lock_masks: Vec<Vec<String>>,
    #[serde(default)]
    pub in_same_filesystem: bool,
    #[serde(default = "default_true")]
    pub remove: bool,
    #[serde(default)]
    pub stupid_mode: bool,
    #[serde(default)]
    pub ignore_size: Option<PredicateConfig>,
    #[serde(default)]
    pub ignore_file_time: Option<PredicateConfig>,
    #[serde(default)]
    pub delete_unknown_files: bool,
    #[serde(default)]
    pub unknown_file_time: i64,
    #[serde(default)]
    pub dup_check: Option<DupCheckConfig>,
    #[serde(default = "default_max_copied_files")]
    pub max_copied_files: u32,
    #[serde(default = "default_max_copied_file_size")]
    pub max_copied_file_size: u64,
    #[serde(default)]
    pub end_character: Option<u8>,
    #[serde(default)]
    pub extract: Option<ExtractConfig>,
}

impl DirCheckConfig {
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("cannot parse configuration {}", path.display()))?;
        if config.directories.is_empty() {
            bail!("configuration lists no directories");
        }
        Ok(config)
    }

    /// The effective work directory, with the environment as fallback.
    pub fn work_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.work_dir {
            return Ok(dir.clone());
        }
        match env::var("AFD_WORK_DIR") {
            Ok(dir) => Ok(PathBuf::from(dir)),
            Err(_) => bail!("work_dir not configured and AFD_WORK_DIR unset"),
        }
    }

    pub fn maintainer(&self) -> String {
        self.maintainer
            .clone()
            .or_else(|| env::var("AFD_MAINTAINER").ok())
            .unwrap_or_default()
    }

    pub fn entries(&self) -> Result<Vec<DirectoryEntry>> {
        self.directories.iter().map(|d| d.to_entry()).collect()
    }
}

impl DirectoryConfig {
    pub fn to_entry(&self) -> Result<DirectoryEntry> {
        if !self.path.is_absolute() {
            bail!(
                "directory {} has a relative path {}",
                self.alias,
                self.path.display()
            );
        }
        let mut entry = DirectoryEntry::new(self.id, self.alias.clone(), self.path.clone());
        entry.priority = self.priority;
        entry.all_files = self.masks.is_empty();
        entry.mask_groups = mask_groups(&self.masks);
        entry.lock_masks = mask_groups(&self.lock_masks);
        entry.in_same_filesystem = self.in_same_filesystem;
        entry.remove = self.remove;
        entry.stupid_mode = self.stupid_mode;
        entry.ignore_size = self.ignore_size.map(|p| SizePredicate {
            comparator: p.comparator,
            size: p.value.max(0) as u64,
        });
        entry.ignore_file_time = self.ignore_file_time.map(|p| AgePredicate {
            comparator: p.comparator,
            seconds: p.value,
        });
        entry.delete_unknown_files = self.delete_unknown_files;
        entry.unknown_file_time = self.unknown_file_time;
        entry.dup_check = self.dup_check.as_ref().map(|d| DupCheckPolicy {
            timeout: Duration::from_secs(d.timeout_secs),
            fingerprint: d.fingerprint,
            actions: DupActions {
                delete: d.delete,
                store: d.store,
                warn: d.warn,
            },
        });
        entry.max_copied_files = self.max_copied_files;
        entry.max_copied_file_size = self.max_copied_file_size;
        entry.end_character = self.end_character;
        entry.extract = match &self.extract {
            Some(e) => Some(e.to_options()?),
            None => None,
        };
        Ok(entry)
    }
}

impl ExtractConfig {
    pub fn to_options(&self) -> Result<ExtractOptions> {
        let format = match &self.format {
            Some(name) => parse_format(name)?,
            None => BulletinFormat::default(),
        };
        Ok(ExtractOptions {
            format,
            extract_reports: self.extract_reports,
            use_external_rules: self.use_external_rules,
            add_full_date: self.add_full_date,
            add_soh_etx: self.add_soh_etx,
            remove_wmo_header: self.remove_wmo_header,
            add_bul_orig_file: self.add_bul_orig_file,
            extra_report_heading: self.extra_report_heading,
            add_additional_info: self.add_additional_info,
            add_crc_checksum: self.add_crc_checksum,
            add_unique_number: self.add_unique_number,
            filter: mask_groups(&self.filter),
        })
    }
}

fn mask_groups(groups: &[Vec<String>]) -> Vec<MaskGroup> {
    groups.iter().map(|g| MaskGroup::parse(g)).collect()
}

/// Map a configured framing name onto the framing variant.
pub fn parse_format(name: &str) -> Result<BulletinFormat> {
    let format = match name {
        "ascii" => BulletinFormat::AsciiStandard,
        "binary" => BulletinFormat::BinaryStandard,
        "zczc" => BulletinFormat::ZczcNnnn,
        "two_byte" => BulletinFormat::TwoByte,
        "four_byte_lbf" => BulletinFormat::FourByteLbf,
        "four_byte_hbf" => BulletinFormat::FourByteHbf,
        "four_byte_mss" => BulletinFormat::FourByteMss,
        "wmo" => BulletinFormat::WmoStandard,
        "wmo_chk" => BulletinFormat::WmoStandardChk,
        other => {
            if let Some(sep) = other.strip_prefix("sp_char:") {
                let mut chars = sep.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii() => BulletinFormat::SpChar(c as u8),
                    _ => bail!("sp_char wants exactly one ASCII character, got {sep:?}"),
                }
            } else {
                bail!("unknown bulletin format {other:?}");
            }
        }
    };
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
work_dir: /var/spool/afd
maintainer: ops@example.net
directories:
  - id: 1
    alias: wmo-in
    path: /data/wmo/in
    priority: '3'
    masks:
      - ["*.b", "!*.tmp"]
    in_same_filesystem: true
    dup_check:
      timeout_secs: 3600
      fingerprint: name_size
      delete: true
    extract:
      format: wmo
      extract_reports: true
      use_external_rules: true
  - id: 2
    alias: plain
    path: /data/plain
    remove: false
bulletins:
  - ttaaii: "SM////"
    cccc: "////"
    bulletin_type: normal
    rcdb_index: 0
reports:
  - tt: "SM"
    report_type: synop
    station_id: i_iiii
    mimj: "AAXX"
"#;

    #[test]
    fn sample_config_parses() {
        let config: DirCheckConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.work_dir.as_deref(), Some(Path::new("/var/spool/afd")));
        assert_eq!(config.directories.len(), 2);
        assert_eq!(config.bulletins.len(), 1);

        let entries = config.entries().unwrap();
        let wmo = &entries[0];
        assert_eq!(wmo.dir_id, 1);
        assert_eq!(wmo.priority, '3');
        assert!(!wmo.all_files);
        assert!(wmo.dup_check.as_ref().unwrap().actions.delete);
        let options = wmo.extract.as_ref().unwrap();
        assert_eq!(options.format, BulletinFormat::WmoStandard);
        assert!(options.extract_reports);

        let plain = &entries[1];
        assert!(plain.all_files);
        assert!(!plain.remove);
    }

    #[test]
    fn relative_directory_paths_are_rejected() {
        let config = DirectoryConfig {
            id: 1,
            alias: "bad".into(),
            path: PathBuf::from("relative/in"),
            priority: '9',
            masks: Vec::new(),
            lock_masks: Vec::new(),
            in_same_filesystem: false,
            remove: true,
            stupid_mode: false,
            ignore_size: None,
            ignore_file_time: None,
            delete_unknown_files: false,
            unknown_file_time: 0,
            dup_check: None,
            max_copied_files: 100,
            max_copied_file_size: 1024,
            end_character: None,
            extract: None,
        };
        assert!(config.to_entry().is_err());
    }

    #[test]
    fn format_names_cover_all_variants() {
        assert_eq!(parse_format("ascii").unwrap(), BulletinFormat::AsciiStandard);
        assert_eq!(parse_format("wmo_chk").unwrap(), BulletinFormat::WmoStandardChk);
        assert_eq!(parse_format("sp_char:=").unwrap(), BulletinFormat::SpChar(b'='));
        assert!(parse_format("mystery").is_err());
        assert!(parse_format("sp_char:ab").is_err());
    }
}
