//! Framing-aware bulletin demultiplexing.
//!
//! A bulletin container file is a concatenation of frames in one of
//! several framing conventions. This module splits the raw bytes into
//! frames; heading parsing and write-out happen elsewhere.

use tracing::warn;

pub const SOH: u8 = 0x01;
pub const ETX: u8 = 0x03;
pub const CR: u8 = 0x0D;
pub const LF: u8 = 0x0A;

/// Framing variant of a bulletin container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletinFormat {
    /// Unbounded stream of `<SOH> .. <ETX>` records.
    AsciiStandard,
    /// A single frame: one leading `<SOH>`, one trailing `<ETX>`.
    BinaryStandard,
    /// `ZCZC` .. `NNNN` terminated records.
    ZczcNnnn,
    /// 2-byte little-endian length, one skipped byte, payload.
    TwoByte,
    /// 4-byte little-endian length, payload.
    FourByteLbf,
    /// 4-byte big-endian length, payload.
    FourByteHbf,
    /// 4-byte length with the high byte forced to zero (MSS convention).
    FourByteMss,
    /// 10-byte WMO header (8 ASCII length digits, spare, type flag).
    WmoStandard,
    /// As WmoStandard, but scans past the declared length for the ETX.
    WmoStandardChk,
    /// Records terminated by a separator character (default `=`).
    SpChar(u8),
}

impl Default for BulletinFormat {
    fn default() -> Self {
        BulletinFormat::AsciiStandard
    }
}

/// One frame cut out of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Frame bytes, including SOH/ETX when the framing carries them.
    pub bytes: &'a [u8],
    /// Whether `bytes` is SOH/ETX wrapped.
    pub wrapped: bool,
}

/// Split a container into frames according to its framing variant.
pub fn split_frames(data: &[u8], format: BulletinFormat) -> Vec<Frame<'_>> {
    match format {
        BulletinFormat::AsciiStandard => ascii_standard(data),
        BulletinFormat::BinaryStandard => binary_standard(data),
        BulletinFormat::ZczcNnnn => zczc_nnnn(data),
        BulletinFormat::TwoByte => two_byte(data),
        BulletinFormat::FourByteLbf => four_byte(data, Endian::Little, false),
        BulletinFormat::FourByteHbf => four_byte(data, Endian::Big, false),
        BulletinFormat::FourByteMss => four_byte(data, Endian::Big, true),
        BulletinFormat::WmoStandard => wmo_standard(data, false),
        BulletinFormat::WmoStandardChk => wmo_standard(data, true),
        BulletinFormat::SpChar(sep) => sp_char(data, sep),
    }
}

fn find(data: &[u8], from: usize, byte: u8) -> Option<usize> {
    data[from.min(data.len())..]
        .iter()
        .position(|&b| b == byte)
        .map(|i| from + i)
}

fn find_seq(data: &[u8], from: usize, seq: &[u8]) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(seq.len())
        .position(|w| w == seq)
        .map(|i| from + i)
}

fn ascii_standard(data: &[u8]) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while let Some(soh) = find(data, pos, SOH) {
        match find(data, soh + 1, ETX) {
            Some(etx) => {
                frames.push(Frame {
                    bytes: &data[soh..=etx],
                    wrapped: true,
                });
                pos = etx + 1;
            }
            None => {
                warn!(offset = soh, "SOH without terminating ETX, frame discarded");
                break;
            }
        }
    }
    frames
}

fn binary_standard(data: &[u8]) -> Vec<Frame<'_>> {
    let soh = match find(data, 0, SOH) {
        Some(p) => p,
        None => {
            warn!("no SOH found in binary bulletin");
            return Vec::new();
        }
    };
    let etx = match data.iter().rposition(|&b| b == ETX) {
        Some(p) if p > soh => p,
        _ => {
            warn!("no trailing ETX found in binary bulletin");
            return Vec::new();
        }
    };
    vec![Frame {
        bytes: &data[soh..=etx],
        wrapped: true,
    }]
}

fn zczc_nnnn(data: &[u8]) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_seq(data, pos, b"ZCZC") {
        match find_seq(data, start + 4, b"NNNN") {
            Some(end) => {
                frames.push(Frame {
                    bytes: &data[start..end + 4],
                    wrapped: false,
                });
                pos = end + 4;
            }
            None => {
                warn!(offset = start, "ZCZC without terminating NNNN, frame discarded");
                break;
            }
        }
    }
    frames
}

fn two_byte(data: &[u8]) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + 3 <= data.len() {
        let length = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        let start = pos + 3;
        if start + length > data.len() {
            warn!(
                offset = pos,
                length, "two-byte frame length overruns input, frame discarded"
            );
            break;
        }
        if length > 0 {
            frames.push(Frame {
                bytes: &data[start..start + length],
                wrapped: false,
            });
        }
        pos = start + length;
    }
    frames
}

enum Endian {
    Little,
    Big,
}

fn four_byte(data: &[u8], endian: Endian, mask_high: bool) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + 4 <= data.len() {
        let raw = [data[pos], data[pos + 1], data[pos + 2], data[pos + 3]];
        let mut length = match endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        };
        if mask_high {
            length &= 0x00FF_FFFF;
        }
        let length = length as usize;
        let start = pos + 4;
        if start + length > data.len() {
            warn!(
                offset = pos,
                length, "four-byte frame length overruns input, frame discarded"
            );
            break;
        }
        if length > 0 {
            frames.push(Frame {
                bytes: &data[start..start + length],
                wrapped: false,
            });
        }
        pos = start + length;
    }
    frames
}

/// Decimal parse of the 8 ASCII length bytes. Deliberately lenient:
/// non-digit bytes still contribute `b - b'0'`, as downstream tools
/// depend on that behavior.
fn wmo_length(bytes: &[u8]) -> i64 {
    bytes
        .iter()
        .fold(0i64, |acc, &b| acc * 10 + (b as i64 - b'0' as i64))
}

fn wmo_standard(data: &[u8], check_etx: bool) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + 10 <= data.len() {
        let length = wmo_length(&data[pos..pos + 8]);
        let type_flag = data[pos + 9];
        let start = pos + 10;
        if length < 0 || start + length as usize > data.len() {
            warn!(
                offset = pos,
                length, "WMO frame length overruns input, frame skipped"
            );
            break;
        }
        let length = length as usize;
        let mut end = start + length;

        let raw = type_flag == b'1';
        if !raw && check_etx && (length == 0 || data[end - 1] != ETX) {
            // Search forward past the declared length for the terminator.
            match find(data, end, ETX) {
                Some(etx) => end = etx + 1,
                None => {
                    warn!(
                        offset = pos,
                        length, "no ETX found past declared WMO frame length, using declared length"
                    );
                }
            }
        }

        if end > start {
            let bytes = &data[start..end];
            let wrapped = !raw
                && bytes.first() == Some(&SOH)
                && bytes.last() == Some(&ETX);
            frames.push(Frame { bytes, wrapped });
        }
        pos = end;
    }
    frames
}

fn sp_char(data: &[u8], sep: u8) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let end = match find(data, pos, sep) {
            Some(p) => p + 1,
            None => data.len(),
        };
        let bytes = &data[pos..end];
        if !bytes.iter().all(|&b| b == CR || b == LF || b == sep) {
            frames.push(Frame {
                bytes,
                wrapped: false,
            });
        }
        pos = end;
    }
    frames
}
