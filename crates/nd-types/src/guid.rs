use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced when parsing a [`ProviderId`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuidParseError {
    #[error("expected five dash-separated groups, got {0}")]
    BadGroupCount(usize),
    #[error("group {index} has length {len}, expected {expected}")]
    BadGroupLength { index: usize, len: usize, expected: usize },
    #[error("invalid hex digit in '{0}'")]
    BadHexDigit(String),
}

/// 128-bit provider identity, written in the canonical hyphenated GUID form
/// (`8-4-4-4-12` hex digits, optionally wrapped in braces).
///
/// The textual byte order is also the in-memory byte order; no field
/// swizzling is applied.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId([u8; 16]);

/// Hex digit counts of the five textual groups.
const GROUP_LENS: [usize; 5] = [8, 4, 4, 4, 12];

impl ProviderId {
    pub const fn from_bytes(bytes: [u8; 16]) -> ProviderId {
        ProviderId(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15],
        )
    }
}

impl fmt::Debug for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderId({self})")
    }
}

impl FromStr for ProviderId {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(s);

        let groups: Vec<&str> = s.split('-').collect();
        if groups.len() != GROUP_LENS.len() {
            return Err(GuidParseError::BadGroupCount(groups.len()));
        }

        let mut bytes = [0u8; 16];
        let mut cursor = 0;
        for (index, (group, &expected)) in groups.iter().zip(&GROUP_LENS).enumerate() {
            if group.len() != expected {
                return Err(GuidParseError::BadGroupLength {
                    index,
                    len: group.len(),
                    expected,
                });
            }
            for pair in group.as_bytes().chunks(2) {
                let pair = std::str::from_utf8(pair)
                    .map_err(|_| GuidParseError::BadHexDigit(group.to_string()))?;
                bytes[cursor] = u8::from_str_radix(pair, 16)
                    .map_err(|_| GuidParseError::BadHexDigit(group.to_string()))?;
                cursor += 1;
            }
        }
        Ok(ProviderId(bytes))
    }
}
