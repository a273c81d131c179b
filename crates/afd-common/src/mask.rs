//! AFD file-mask dialect.
//!
//! A mask is a shell-style pattern over a filename: `*` matches any run of
//! bytes (including none), `?` matches exactly one byte, everything else
//! matches literally. A mask whose first character is `!` is a negative
//! mask; the `!` is not part of the pattern.
//!
//! Masks are organised into ordered groups. Within a group the masks are
//! tested in order: the first positive mask that matches accepts the name
//! and ends the group scan; a negative mask that matches rejects the name
//! and short-circuits the whole group list. A name is wanted when any
//! group accepts it.

use serde::{Deserialize, Serialize};

/// A single filename mask, positive or negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    pattern: String,
    negative: bool,
}

impl Mask {
    /// Parse a mask string, honoring a leading `!`.
    pub fn parse(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix('!') {
            Self {
                pattern: rest.to_string(),
                negative: true,
            }
        } else {
            Self {
                pattern: s.to_string(),
                negative: false,
            }
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Test the pattern (ignoring the negative marker) against a filename.
    pub fn matches(&self, name: &str) -> bool {
        glob_match(self.pattern.as_bytes(), name.as_bytes())
    }
}

/// An ordered sequence of masks evaluated together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskGroup {
    pub masks: Vec<Mask>,
}

impl MaskGroup {
    pub fn new(masks: Vec<Mask>) -> Self {
        Self { masks }
    }

    /// Parse a list of mask strings into a group.
    pub fn parse<S: AsRef<str>>(masks: &[S]) -> Self {
        Self {
            masks: masks.iter().map(|m| Mask::parse(m.as_ref())).collect(),
        }
    }
}

/// Outcome of scanning one group.
enum GroupVerdict {
    Accept,
    /// A negative mask matched; stop scanning all remaining groups.
    RejectAll,
    NoMatch,
}

fn match_group(group: &MaskGroup, name: &str) -> GroupVerdict {
    for mask in &group.masks {
        if mask.matches(name) {
            if mask.is_negative() {
                return GroupVerdict::RejectAll;
            }
            return GroupVerdict::Accept;
        }
    }
    GroupVerdict::NoMatch
}

/// Decide whether `name` is wanted under the given mask-group list.
pub fn wanted(groups: &[MaskGroup], name: &str) -> bool {
    for group in groups {
        match match_group(group, name) {
            GroupVerdict::Accept => return true,
            GroupVerdict::RejectAll => return false,
            GroupVerdict::NoMatch => {}
        }
    }
    false
}

/// Shell-style matcher over raw bytes. Iterative with single-star
/// backtracking, so pathological patterns stay linear.
fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    let (mut p, mut n) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((sp, sn)) = star {
            p = sp + 1;
            n = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
