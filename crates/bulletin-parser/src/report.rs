//! Slicing a bulletin body into individual reports.
//!
//! Each report family has a heading-skipping rule and a station-id
//! recogniser. After the bulletin heading is consumed the slicer loops:
//! recognise a station id, scan to the `=` terminator, emit the report.
//! `NIL`/`NNNN`/`//` markers are legitimate empties and skipped silently;
//! any other recogniser failure logs a warning with a hex dump and
//! resynchronises at the next `=`.

use tracing::{debug, error, info, warn};

use crate::config::{ReportConfigEntry, ReportType, StationIdKind};
use crate::framing::{CR, ETX, LF};
use crate::heading::DerivedHeading;

/// One sliced report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report<'a> {
    pub station: String,
    /// Report bytes from the station id through the consumed `=` run.
    pub body: &'a [u8],
}

/// All reports sliced out of one bulletin frame.
#[derive(Debug, Clone, Default)]
pub struct ReportSet<'a> {
    /// Captured SYNOP-style extra heading (e.g. `AAXX 01001`), with its
    /// trailing line break.
    pub extra_heading: Option<&'a [u8]>,
    /// Wind-indicator digit taken from the extra heading's YYGGiw group.
    pub wid: Option<char>,
    pub reports: Vec<Report<'a>>,
}

/// Outcome of report extraction for one frame.
#[derive(Debug)]
pub enum ReportOutcome<'a> {
    /// Report extraction declined; the bulletin-level write still happens.
    Declined,
    Reports(ReportSet<'a>),
}

type Recogniser = fn(&[u8]) -> Option<(String, usize)>;

fn boundary(b: u8) -> bool {
    !b.is_ascii_alphanumeric()
}

/// 4-letter ICAO code.
fn recognise_cccc(s: &[u8]) -> Option<(String, usize)> {
    if s.len() >= 4
        && s[..4].iter().all(|b| b.is_ascii_uppercase())
        && (s.len() == 4 || boundary(s[4]))
    {
        Some((String::from_utf8_lossy(&s[..4]).into_owned(), 4))
    } else {
        None
    }
}

/// 5-digit WMO block/station number.
fn recognise_iiiii(s: &[u8]) -> Option<(String, usize)> {
    if s.len() >= 5
        && s[..5].iter().all(|b| b.is_ascii_digit())
        && (s.len() == 5 || boundary(s[5]))
    {
        Some((String::from_utf8_lossy(&s[..5]).into_owned(), 5))
    } else {
        None
    }
}

/// Ship/mobile callsign: 3 to 9 alphanumeric characters.
fn recognise_callsign(s: &[u8]) -> Option<(String, usize)> {
    let len = s.iter().take_while(|b| b.is_ascii_alphanumeric()).count();
    if (3..=9).contains(&len) && (s.len() == len || boundary(s[len])) {
        Some((String::from_utf8_lossy(&s[..len]).into_owned(), len))
    } else {
        None
    }
}

fn recogniser_for(entry: &ReportConfigEntry) -> Recogniser {
    match entry.report_type {
        ReportType::SynopShip | ReportType::SynopMobil => recognise_callsign,
        _ => match entry.station_id {
            StationIdKind::Cccc => recognise_cccc,
            StationIdKind::IIiii => recognise_iiiii,
        },
    }
}

fn skip_space_crlf(data: &[u8], mut p: usize) -> usize {
    while p < data.len() && (data[p] == b' ' || data[p] == CR || data[p] == LF) {
        p += 1;
    }
    p
}

fn skip_token(data: &[u8], mut p: usize) -> usize {
    while p < data.len() && data[p] != b' ' && data[p] != CR && data[p] != LF {
        p += 1;
    }
    while p < data.len() && data[p] == b' ' {
        p += 1;
    }
    p
}

fn token_at<'a>(data: &'a [u8], p: usize) -> &'a [u8] {
    let end = data[p..]
        .iter()
        .position(|&b| b == b' ' || b == CR || b == LF)
        .map(|o| p + o)
        .unwrap_or(data.len());
    &data[p..end]
}

/// Skip past the next `=` run, for resynchronisation.
fn skip_past_equals(data: &[u8], mut p: usize) -> usize {
    while p < data.len() && data[p] != b'=' {
        p += 1;
    }
    while p < data.len() && data[p] == b'=' {
        p += 1;
    }
    p
}

fn hexdump(data: &[u8]) -> String {
    data.iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Consume the report-family heading at `p`. Returns the new position,
/// the captured extra heading and the wind-indicator digit.
fn skip_report_heading<'a>(
    data: &'a [u8],
    mut p: usize,
    rt: ReportType,
) -> (usize, Option<&'a [u8]>, Option<char>) {
    p = skip_space_crlf(data, p);
    match rt {
        ReportType::Taf => {
            if data[p..].starts_with(b"TAF") {
                p = skip_token(data, p);
                p = skip_space_crlf(data, p);
                while data[p..].starts_with(b"AMD") || data[p..].starts_with(b"COR") {
                    p = skip_token(data, p);
                    p = skip_space_crlf(data, p);
                }
            }
            (p, None, None)
        }
        ReportType::Metar => {
            if data[p..].starts_with(b"METAR") || data[p..].starts_with(b"SPECI") {
                p = (p + 6).min(data.len());
                p = skip_space_crlf(data, p);
                while data[p..].starts_with(b"COR") || data[p..].starts_with(b"RRA") {
                    p = skip_token(data, p);
                    p = skip_space_crlf(data, p);
                }
            }
            (p, None, None)
        }
        ReportType::Climat => {
            // The CLIMAT line with its MMJJJ group carries no station.
            while p < data.len() && data[p] != CR && data[p] != LF {
                p += 1;
            }
            (skip_space_crlf(data, p), None, None)
        }
        ReportType::Synop | ReportType::SynopShip | ReportType::SynopMobil => {
            let tok = token_at(data, p);
            if tok == b"AAXX" || tok == b"BBXX" || tok == b"OOXX" {
                let start = p;
                p = skip_token(data, p);
                let group = token_at(data, p);
                let wid = if group.len() == 5 {
                    Some(group[4] as char)
                } else {
                    None
                };
                p += group.len();
                let mut end = p;
                while end < data.len() && (data[end] == CR || data[end] == LF) {
                    end += 1;
                }
                let heading = &data[start..end];
                (skip_space_crlf(data, p), Some(heading), wid)
            } else {
                (p, None, None)
            }
        }
        _ => (p, None, None),
    }
}

/// Slice a frame's body into reports.
///
/// `frame` is the full frame; the body starts past the heading line
/// located at `heading.header_start`.
pub fn extract_reports<'a>(
    frame: &'a [u8],
    heading: &DerivedHeading,
    entry: Option<&ReportConfigEntry>,
) -> ReportOutcome<'a> {
    let entry = match entry {
        Some(e) => e,
        None => {
            info!(bulletin = %heading.name, "no report configuration entry, reports not extracted");
            return ReportOutcome::Declined;
        }
    };
    match entry.report_type {
        ReportType::Text => {
            info!(bulletin = %heading.name, "plain-text bulletin, reports not extracted");
            return ReportOutcome::Declined;
        }
        ReportType::NotDefined => {
            error!(bulletin = %heading.name, "report type not defined, reports not extracted");
            return ReportOutcome::Declined;
        }
        _ => {}
    }

    // Move past the heading line into the body.
    let mut p = heading.header_start;
    while p < frame.len() && frame[p] != CR && frame[p] != LF {
        p += 1;
    }
    p = skip_space_crlf(frame, p);

    let (mut p, extra_heading, wid) = skip_report_heading(frame, p, entry.report_type);
    let recognise = recogniser_for(entry);
    let mut set = ReportSet {
        extra_heading,
        wid,
        reports: Vec::new(),
    };

    while p < frame.len() {
        p = skip_space_crlf(frame, p);
        if p >= frame.len() || frame[p] == ETX {
            break;
        }

        let rest = &frame[p..];
        if rest.starts_with(b"NIL") || rest.starts_with(b"NNNN") || rest.starts_with(b"//") {
            p = skip_past_equals(frame, p);
            continue;
        }

        // Upper-air reports open with their MiMj group and a day-hour
        // group before the station id.
        let mut station_pos = p;
        if entry.report_type == ReportType::UpperAir {
            let tok = token_at(frame, station_pos);
            if tok.len() == 4 && tok.iter().all(|b| b.is_ascii_uppercase()) {
                station_pos = skip_token(frame, station_pos);
                let group = token_at(frame, station_pos);
                if group.len() == 5 && group.iter().all(|b| b.is_ascii_digit()) {
                    station_pos = skip_token(frame, station_pos);
                }
            }
        }

        match recognise(&frame[station_pos..]) {
            Some((station, used)) => {
                let mut end = skip_past_equals(frame, station_pos + used);
                // A report carrying only NIL after the station id is an
                // empty marker, not a report.
                let after_station: &[u8] = &frame[station_pos + used..end];
                let trimmed: Vec<u8> = after_station
                    .iter()
                    .copied()
                    .filter(|&b| b != b' ' && b != CR && b != LF)
                    .collect();
                if trimmed == b"NIL=" || trimmed == b"NIL" {
                    debug!(bulletin = %heading.name, station = %station, "NIL report skipped");
                    p = end;
                    continue;
                }

                set.reports.push(Report {
                    station,
                    body: &frame[p..end],
                });

                // Trailing CR/LF, then up to three printable garbage
                // bytes when followed by a line break.
                while end < frame.len() && (frame[end] == CR || frame[end] == LF) {
                    end += 1;
                }
                let garbage = frame[end..]
                    .iter()
                    .take_while(|b| b.is_ascii_graphic())
                    .count();
                if garbage > 0
                    && garbage <= 3
                    && frame
                        .get(end + garbage)
                        .map_or(false, |&b| b == CR || b == LF)
                {
                    end += garbage;
                }
                p = end;
            }
            None => {
                let line_end = frame[p..]
                    .iter()
                    .position(|&b| b == CR || b == LF)
                    .map(|o| p + o)
                    .unwrap_or(frame.len());
                warn!(
                    bulletin = %heading.name,
                    line = %hexdump(&frame[p..line_end]),
                    "station recogniser failed, resynchronising at next '='"
                );
                let next = skip_past_equals(frame, p);
                if next == p {
                    break;
                }
                p = next;
            }
        }
    }

    ReportOutcome::Reports(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heading;
    use chrono::Utc;

    fn metar_entry() -> ReportConfigEntry {
        ReportConfigEntry {
            tt: "SA".to_string(),
            report_type: ReportType::Metar,
            station_id: StationIdKind::Cccc,
            mimj: String::new(),
            btime: String::new(),
            itime: String::new(),
            wid: String::new(),
        }
    }

    fn synop_entry() -> ReportConfigEntry {
        ReportConfigEntry {
            tt: "SM".to_string(),
            report_type: ReportType::Synop,
            station_id: StationIdKind::IIiii,
            mimj: "AAXX".to_string(),
            btime: String::new(),
            itime: String::new(),
            wid: String::new(),
        }
    }

    fn build_frame(heading_line: &str, body: &str) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(heading_line.as_bytes());
        f.extend_from_slice(b"\r\r\n");
        f.extend_from_slice(body.as_bytes());
        f
    }

    #[test]
    fn two_metar_reports_sliced() {
        let frame = build_frame(
            "SAOS31 LOWM 010000",
            "METAR\r\r\nLOWW 010000Z 00000KT CAVOK M01/M03 Q1020=\r\r\nLOWS 010000Z 36005KT 9999 FEW030 03/M01 Q1019=\r\r\n",
        );
        let h = heading::derive(&frame, false, Utc::now()).unwrap();
        let entry = metar_entry();
        let set = match extract_reports(&frame, &h, Some(&entry)) {
            ReportOutcome::Reports(s) => s,
            ReportOutcome::Declined => panic!("declined"),
        };
        assert_eq!(set.reports.len(), 2);
        assert_eq!(set.reports[0].station, "LOWW");
        assert!(set.reports[0].body.starts_with(b"LOWW 010000Z"));
        assert!(set.reports[0].body.ends_with(b"="));
        assert_eq!(set.reports[1].station, "LOWS");
        assert!(set.reports[1].body.starts_with(b"LOWS 010000Z"));
    }

    #[test]
    fn synop_nil_station_block_skipped() {
        let frame = build_frame("SMVD20 LOWM 010000", "AAXX 01001\r\r\n11036 NIL=\r\r\n");
        let h = heading::derive(&frame, false, Utc::now()).unwrap();
        let entry = synop_entry();
        let set = match extract_reports(&frame, &h, Some(&entry)) {
            ReportOutcome::Reports(s) => s,
            ReportOutcome::Declined => panic!("declined"),
        };
        assert!(set.reports.is_empty());
        assert_eq!(set.extra_heading.unwrap(), b"AAXX 01001\r\r\n");
        assert_eq!(set.wid, Some('1'));
    }

    #[test]
    fn synop_station_reports_carry_extra_heading() {
        let frame = build_frame(
            "SMVD20 LOWM 010000",
            "AAXX 01004\r\r\n11036 11725 82102 10048=\r\r\n11010 32566 82711 10112=\r\r\n",
        );
        let h = heading::derive(&frame, false, Utc::now()).unwrap();
        let entry = synop_entry();
        let set = match extract_reports(&frame, &h, Some(&entry)) {
            ReportOutcome::Reports(s) => s,
            ReportOutcome::Declined => panic!("declined"),
        };
        assert_eq!(set.reports.len(), 2);
        assert_eq!(set.reports[0].station, "11036");
        assert_eq!(set.reports[1].station, "11010");
        assert_eq!(set.wid, Some('4'));
    }

    #[test]
    fn text_type_declined() {
        let frame = build_frame("NOXX01 LOWM 010000", "free text");
        let h = heading::derive(&frame, false, Utc::now()).unwrap();
        let mut entry = metar_entry();
        entry.report_type = ReportType::Text;
        assert!(matches!(
            extract_reports(&frame, &h, Some(&entry)),
            ReportOutcome::Declined
        ));
    }

    #[test]
    fn not_defined_type_declined() {
        let frame = build_frame("SAOS31 LOWM 010000", "anything=");
        let h = heading::derive(&frame, false, Utc::now()).unwrap();
        let mut entry = metar_entry();
        entry.report_type = ReportType::NotDefined;
        assert!(matches!(
            extract_reports(&frame, &h, Some(&entry)),
            ReportOutcome::Declined
        ));
    }

    #[test]
    fn missing_entry_declined() {
        let frame = build_frame("SAOS31 LOWM 010000", "METAR\r\r\nLOWW 010000Z=");
        let h = heading::derive(&frame, false, Utc::now()).unwrap();
        assert!(matches!(
            extract_reports(&frame, &h, None),
            ReportOutcome::Declined
        ));
    }

    #[test]
    fn bad_line_resynchronises() {
        let frame = build_frame(
            "SAOS31 LOWM 010000",
            "METAR\r\r\nbad line without station=\r\r\nLOWS 010000Z 36005KT Q1019=\r\r\n",
        );
        let h = heading::derive(&frame, false, Utc::now()).unwrap();
        let entry = metar_entry();
        let set = match extract_reports(&frame, &h, Some(&entry)) {
            ReportOutcome::Reports(s) => s,
            ReportOutcome::Declined => panic!("declined"),
        };
        assert_eq!(set.reports.len(), 1);
        assert_eq!(set.reports[0].station, "LOWS");
    }

    #[test]
    fn taf_heading_and_amendments_skipped() {
        let frame = build_frame(
            "FCOS31 LOWM 010000",
            "TAF AMD\r\r\nLOWW 010500Z 0106/0206 VRB02KT CAVOK=\r\r\n",
        );
        let h = heading::derive(&frame, false, Utc::now()).unwrap();
        let mut entry = metar_entry();
        entry.report_type = ReportType::Taf;
        let set = match extract_reports(&frame, &h, Some(&entry)) {
            ReportOutcome::Reports(s) => s,
            ReportOutcome::Declined => panic!("declined"),
        };
        assert_eq!(set.reports.len(), 1);
        assert_eq!(set.reports[0].station, "LOWW");
    }
}
