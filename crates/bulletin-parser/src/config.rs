//! Bulletin and report configuration tables.
//!
//! The bulletin table (bcdb) maps a bulletin heading, identified by its
//! TTAAii data designator and CCCC originating centre, to a handling
//! entry. The report table (rcdb) describes how to slice a bulletin of a
//! given TT prefix into individual reports. Both tables are loaded once
//! at startup from the directory configuration.

use serde::{Deserialize, Serialize};

/// How a matched bulletin is to be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletinType {
    Normal,
    /// Matching bulletins are silently discarded.
    Ignore,
}

/// One entry of the bulletin configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletinConfigEntry {
    /// TTAAii pattern; `/` is a single-character wildcard.
    pub ttaaii: String,
    /// CCCC pattern; `/` is a single-character wildcard.
    pub cccc: String,
    pub bulletin_type: BulletinType,
    /// Index into the report table, when reports are to be extracted.
    pub rcdb_index: Option<usize>,
}

/// Report families known to the slicer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Text,
    Climat,
    Taf,
    Metar,
    Synop,
    SynopShip,
    SynopMobil,
    UpperAir,
    Special01,
    Special02,
    Special03,
    Special66,
    AsciiText,
    NotDefined,
}

/// Shape of the station identifier inside a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationIdKind {
    /// 4-letter ICAO code.
    Cccc,
    /// 5-digit WMO block/station number.
    IIiii,
}

/// One entry of the report configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfigEntry {
    /// TT prefix this entry applies to (e.g. "SA" for METAR).
    pub tt: String,
    pub report_type: ReportType,
    pub station_id: StationIdKind,
    /// MiMj annotation (e.g. "AAXX").
    #[serde(default)]
    pub mimj: String,
    /// Bulletin-time annotation.
    #[serde(default)]
    pub btime: String,
    /// Issue-time annotation.
    #[serde(default)]
    pub itime: String,
    /// Configured wind-indicator annotation.
    #[serde(default)]
    pub wid: String,
}

/// Match a heading token against a pattern where `/` wildcards one
/// character. Lengths must agree.
fn pattern_matches(pattern: &str, token: &str) -> bool {
    if pattern.len() != token.len() {
        return false;
    }
    pattern
        .bytes()
        .zip(token.bytes())
        .all(|(p, t)| p == b'/' || p == t)
}

/// Find the bcdb entry for a bulletin heading. When several entries
/// apply, the last match wins.
pub fn find_bulletin_entry<'a>(
    bcdb: &'a [BulletinConfigEntry],
    ttaaii: &str,
    cccc: &str,
) -> Option<(usize, &'a BulletinConfigEntry)> {
    let mut found = None;
    for (pos, entry) in bcdb.iter().enumerate() {
        if pattern_matches(&entry.ttaaii, ttaaii) && pattern_matches(&entry.cccc, cccc) {
            found = Some((pos, entry));
        }
    }
    found
}
