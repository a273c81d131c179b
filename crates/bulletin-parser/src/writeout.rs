//! Output assembly for extracted bulletins and reports.

use crate::framing::{Frame, CR, ETX, LF, SOH};

/// Options influencing the assembled output bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleOptions {
    pub add_soh_etx: bool,
    pub remove_wmo_header: bool,
}

fn push_orig_prefix(out: &mut Vec<u8>, prefix: Option<(&str, &str)>) {
    if let Some((derived, original)) = prefix {
        out.extend_from_slice(derived.as_bytes());
        out.push(b' ');
        out.extend_from_slice(original.as_bytes());
        out.extend_from_slice(&[CR, CR, LF]);
    }
}

fn strip_trailing_etx(out: &mut Vec<u8>) {
    if out.last() == Some(&ETX) {
        let before = &out[..out.len() - 1];
        if before.is_empty() || before.last() == Some(&CR) || before.last() == Some(&LF) {
            out.pop();
        }
    }
}

/// Skip to the content past the first CR/LF run at or after `from`.
fn past_first_crlf_run(data: &[u8], from: usize) -> usize {
    let mut p = from;
    while p < data.len() && data[p] != CR && data[p] != LF {
        p += 1;
    }
    while p < data.len() && (data[p] == CR || data[p] == LF) {
        p += 1;
    }
    p
}

/// Assemble the output bytes for a bulletin-level write.
///
/// `header_start` is the offset of the heading line within the frame.
pub fn assemble_bulletin(
    frame: &Frame<'_>,
    header_start: usize,
    orig_prefix: Option<(&str, &str)>,
    opts: AssembleOptions,
) -> Vec<u8> {
    let mut out = Vec::new();
    push_orig_prefix(&mut out, orig_prefix);

    if opts.remove_wmo_header {
        let body_start = past_first_crlf_run(frame.bytes, header_start);
        out.extend_from_slice(&frame.bytes[body_start..]);
        strip_trailing_etx(&mut out);
    } else if opts.add_soh_etx && !frame.wrapped {
        out.push(SOH);
        out.extend_from_slice(frame.bytes);
        out.push(ETX);
    } else {
        out.extend_from_slice(frame.bytes);
        if !opts.add_soh_etx && !frame.wrapped {
            strip_trailing_etx(&mut out);
        }
    }
    out
}

/// Assemble the output bytes for one extracted report.
pub fn assemble_report(
    body: &[u8],
    extra_heading: Option<&[u8]>,
    opts: AssembleOptions,
) -> Vec<u8> {
    let mut content = Vec::new();
    if let Some(heading) = extra_heading {
        content.extend_from_slice(heading);
    }
    content.extend_from_slice(body);
    strip_trailing_etx(&mut content);

    if opts.add_soh_etx {
        let mut out = vec![SOH, CR, CR, LF];
        out.append(&mut content);
        out.extend_from_slice(&[CR, CR, LF, ETX]);
        return out;
    }
    content
}
