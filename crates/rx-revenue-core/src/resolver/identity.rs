//! Facility identity codes.
//!
//! A free-text facility name becomes `FACILITY10-LOCATION10`: the first and
//! last ten characters of the cleaned name, upper-cased and padded with `_`.
//! Stored and looked-up codes always use the canonical form, where the
//! separator hyphen is replaced by `_`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel for names that clean down to nothing.
pub const INVALID_IDENTITY: &str = "INVALID";

/// Characters per segment.
pub const SEGMENT_LEN: usize = 10;

/// Padding for short segments.
pub const FILLER: char = '_';

const DISPLAY_SEPARATOR: char = '-';
const CANONICAL_SEPARATOR: char = '_';

/// Canonical identity code, as stored and looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityCode(String);

impl IdentityCode {
    /// Accept a code in display or canonical form.
    ///
    /// Returns `None` for empty input and the `INVALID` sentinel.
    pub fn parse(raw: &str) -> Option<Self> {
        let code = raw.trim().to_uppercase();
        if code.is_empty() || code == INVALID_IDENTITY {
            return None;
        }
        Some(Self(code.replace(DISPLAY_SEPARATOR, &CANONICAL_SEPARATOR.to_string())))
    }

    /// Canonical (underscore) form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `FACILITY10-LOCATION10` form for codes produced by `derive_identity`.
    pub fn display_form(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() == SEGMENT_LEN * 2 + 1 && chars[SEGMENT_LEN] == CANONICAL_SEPARATOR {
            let facility: String = chars[..SEGMENT_LEN].iter().collect();
            let location: String = chars[SEGMENT_LEN + 1..].iter().collect();
            format!("{}{}{}", facility, DISPLAY_SEPARATOR, location)
        } else {
            self.0.clone()
        }
    }
}

impl fmt::Display for IdentityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of coding a facility name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Identity {
    Valid(IdentityCode),
    Invalid,
}

impl Identity {
    /// The canonical code, if valid.
    pub fn code(&self) -> Option<&IdentityCode> {
        match self {
            Identity::Valid(code) => Some(code),
            Identity::Invalid => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Identity::Invalid)
    }

    /// Canonical string for storage; `INVALID` for the sentinel.
    pub fn storage_form(&self) -> String {
        match self {
            Identity::Valid(code) => code.as_str().to_string(),
            Identity::Invalid => INVALID_IDENTITY.to_string(),
        }
    }

    /// Read back a stored identity string.
    pub fn from_storage(raw: &str) -> Self {
        IdentityCode::parse(raw).map(Identity::Valid).unwrap_or(Identity::Invalid)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.storage_form()
    }
}

impl From<String> for Identity {
    fn from(raw: String) -> Self {
        Identity::from_storage(&raw)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Valid(code) => f.write_str(&code.display_form()),
            Identity::Invalid => f.write_str(INVALID_IDENTITY),
        }
    }
}

/// Derive the identity of a facility name.
///
/// The whole name is one token; commas and locations are not split out.
/// Total and deterministic for any input.
pub fn derive_identity(raw_name: &str) -> Identity {
    let cleaned: String = raw_name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Identity::Invalid;
    }

    let chars: Vec<char> = cleaned.chars().collect();
    let head: String = chars.iter().take(SEGMENT_LEN).collect();
    let tail: String = chars[chars.len().saturating_sub(SEGMENT_LEN)..].iter().collect();

    Identity::Valid(IdentityCode(format!(
        "{}{}{}",
        segment(&head),
        CANONICAL_SEPARATOR,
        segment(&tail)
    )))
}

/// Upper-case and pad to exactly `SEGMENT_LEN` characters.
fn segment(raw: &str) -> String {
    let mut out: String = raw.to_uppercase().chars().take(SEGMENT_LEN).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(FILLER).take(SEGMENT_LEN - len));
    out
}
