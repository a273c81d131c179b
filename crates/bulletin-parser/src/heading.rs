//! Bulletin heading parsing and filename derivation.
//!
//! The output filename of an extracted bulletin is built from the first
//! heading line of the frame: framing prefixes are stripped, the heading
//! is copied with unsafe characters mapped to `_`, and optionally a full
//! `YYYYMM` date is spliced in front of the day-of-month group.

use chrono::{DateTime, Datelike, Utc};

use crate::framing::{CR, LF, SOH};

/// Maximum heading characters copied into the name.
const MAX_NAME_COPY: usize = 25;

/// Heading information derived from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedHeading {
    /// Derived output filename (without report/option suffixes).
    pub name: String,
    /// First heading token (TTAAii data designator).
    pub ttaaii: String,
    /// Second heading token (CCCC originating centre).
    pub cccc: String,
    /// Offset of the heading start within the frame.
    pub header_start: usize,
}

fn skip_crlf(frame: &[u8], mut p: usize) -> usize {
    while p < frame.len() && (frame[p] == CR || frame[p] == LF) {
        p += 1;
    }
    p
}

/// Strip framing prefixes: leading SOH with its CR/CR/LF, a 3-digit
/// sequence number line, and a `ZCZC` start-of-message marker.
fn strip_prefixes(frame: &[u8]) -> usize {
    let mut p = 0;
    if frame.first() == Some(&SOH) {
        p = skip_crlf(frame, 1);
    }
    if frame.len() >= p + 4
        && frame[p..p + 3].iter().all(|b| b.is_ascii_digit())
        && (frame[p + 3] == CR || frame[p + 3] == LF)
    {
        p = skip_crlf(frame, p + 3);
    }
    if frame[p..].starts_with(b"ZCZC") {
        p += 4;
        while p < frame.len() && frame[p] == b' ' {
            p += 1;
        }
        p = skip_crlf(frame, p);
    }
    p
}

/// Six-digit `YYYYMM` for the heading day, taken from the file mtime
/// with month roll-over correction when the days differ by more than 26.
fn full_date(mtime: DateTime<Utc>, header_day: i32) -> String {
    let mut year = mtime.year();
    let mut month = mtime.month() as i32;
    let diff = header_day - mtime.day() as i32;
    if diff > 26 {
        month -= 1;
        if month < 1 {
            month = 12;
            year -= 1;
        }
    } else if diff < -26 {
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    format!("{:04}{:02}", year, month)
}

/// Derive the output filename from a frame's heading line.
///
/// Returns `None` when the heading is empty after stripping.
pub fn derive(frame: &[u8], add_full_date: bool, mtime: DateTime<Utc>) -> Option<DerivedHeading> {
    let header_start = strip_prefixes(frame);

    let mut name = String::new();
    let mut spaces_seen = 0u32;
    let mut date_inserted = false;
    let mut i = header_start;
    let mut copied = 0;
    while i < frame.len() && copied < MAX_NAME_COPY {
        let b = frame[i];
        if b == CR || b == LF {
            break;
        }
        if b == b' ' || b == b'/' || b < 32 || b > b'z' {
            name.push('_');
        } else {
            name.push(b as char);
        }
        copied += 1;
        i += 1;

        if b == b' ' {
            spaces_seen += 1;
            if add_full_date && !date_inserted && spaces_seen == 2 {
                if i + 1 < frame.len()
                    && frame[i].is_ascii_digit()
                    && frame[i + 1].is_ascii_digit()
                {
                    let day = ((frame[i] - b'0') * 10 + (frame[i + 1] - b'0')) as i32;
                    name.push_str(&full_date(mtime, day));
                }
                date_inserted = true;
            }
        }
    }

    while name.ends_with('_') {
        name.pop();
    }
    if name.is_empty() {
        return None;
    }

    // Heading tokens for the bulletin-configuration lookup.
    let line_end = frame[header_start..]
        .iter()
        .position(|&b| b == CR || b == LF)
        .map(|o| header_start + o)
        .unwrap_or(frame.len());
    let line = &frame[header_start..line_end];
    let mut tokens = line
        .split(|&b| b == b' ')
        .filter(|t| !t.is_empty())
        .map(|t| String::from_utf8_lossy(t).into_owned());
    let ttaaii = tokens.next().unwrap_or_default();
    let cccc = tokens.next().unwrap_or_default();

    Some(DerivedHeading {
        name,
        ttaaii,
        cccc,
        header_start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame_with_soh(heading: &str) -> Vec<u8> {
        let mut f = vec![SOH, CR, CR, LF];
        f.extend_from_slice(b"001");
        f.extend_from_slice(&[CR, CR, LF]);
        f.extend_from_slice(heading.as_bytes());
        f.extend_from_slice(&[CR, CR, LF]);
        f.extend_from_slice(b"AAXX 01001");
        f
    }

    #[test]
    fn synop_heading_name() {
        let frame = frame_with_soh("SMVD20 LOWM 010000");
        let mtime = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let h = derive(&frame, false, mtime).unwrap();
        assert_eq!(h.name, "SMVD20_LOWM_010000");
        assert_eq!(h.ttaaii, "SMVD20");
        assert_eq!(h.cccc, "LOWM");
    }

    #[test]
    fn zczc_prefix_stripped() {
        let mut frame = b"ZCZC  ".to_vec();
        frame.extend_from_slice(b"SATE31 KWBC 121200");
        frame.extend_from_slice(&[CR, LF]);
        let mtime = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();
        let h = derive(&frame, false, mtime).unwrap();
        assert_eq!(h.name, "SATE31_KWBC_121200");
    }

    #[test]
    fn full_date_inserted_after_second_space() {
        let frame = frame_with_soh("SMVD20 LOWM 010000");
        let mtime = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();
        let h = derive(&frame, true, mtime).unwrap();
        assert_eq!(h.name, "SMVD20_LOWM_202403010000");
    }

    #[test]
    fn full_date_rolls_back_a_month() {
        // Bulletin from the 31st arriving on the 1st of the next month.
        let frame = frame_with_soh("SMVD20 LOWM 310000");
        let mtime = Utc.with_ymd_and_hms(2024, 4, 1, 0, 5, 0).unwrap();
        let h = derive(&frame, true, mtime).unwrap();
        assert_eq!(h.name, "SMVD20_LOWM_202403310000");
    }

    #[test]
    fn full_date_rolls_forward_a_month() {
        // Bulletin for the 1st with an mtime still on the 31st.
        let frame = frame_with_soh("SMVD20 LOWM 010000");
        let mtime = Utc.with_ymd_and_hms(2023, 12, 31, 23, 58, 0).unwrap();
        let h = derive(&frame, true, mtime).unwrap();
        assert_eq!(h.name, "SMVD20_LOWM_202401010000");
    }

    #[test]
    fn non_digit_day_skips_date_insertion() {
        let frame = frame_with_soh("SMVD20 LOWM RRA");
        let mtime = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let h = derive(&frame, true, mtime).unwrap();
        assert_eq!(h.name, "SMVD20_LOWM_RRA");
    }

    #[test]
    fn unsafe_characters_mapped() {
        let frame = b"SM{D20 LO|M 010000\r".to_vec();
        let mtime = Utc::now();
        let h = derive(&frame, false, mtime).unwrap();
        assert_eq!(h.name, "SM_D20_LO_M_010000");
    }

    #[test]
    fn name_capped_at_25_heading_chars() {
        let frame = b"AAAAAA BBBB 010000 CCC DDD EEE\r".to_vec();
        let h = derive(&frame, false, Utc::now()).unwrap();
        assert_eq!(h.name.len(), 25);
        assert_eq!(h.name, "AAAAAA_BBBB_010000_CCC_DD");
    }

    #[test]
    fn empty_heading_discarded() {
        let frame = vec![SOH, CR, CR, LF, CR, LF];
        assert!(derive(&frame, false, Utc::now()).is_none());
    }
}
