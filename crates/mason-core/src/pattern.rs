//! `%` wildcard matching for rule targets and dependencies.
//!
//! A pattern holds at most one `%`. Binding a target against a pattern
//! checks the literal prefix and suffix and yields the middle substring
//! as the stem. The stem may be empty and may span path separators.

use crate::error::{Error, Result};

pub const WILDCARD: char = '%';

/// A validated rule pattern. At most one `%`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    /// Byte offset of the `%`, if any.
    wildcard_at: Option<usize>,
}

impl Pattern {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let mut positions = raw.match_indices(WILDCARD).map(|(i, _)| i);
        let wildcard_at = positions.next();
        if positions.next().is_some() {
            return Err(Error::invalid_pattern(raw, "more than one '%'"));
        }
        Ok(Self { raw, wildcard_at })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard_at.is_some()
    }

    /// Length of the literal text before the `%` (whole pattern when
    /// there is no wildcard). Tie-break key for overlapping patterns.
    pub fn literal_prefix_len(&self) -> usize {
        self.wildcard_at.unwrap_or(self.raw.len())
    }

    /// Match `target` against this pattern. Returns the bound stem, or
    /// `None` when the target does not match. A pattern without `%`
    /// matches only an exactly equal target (empty stem).
    pub fn bind<'t>(&self, target: &'t str) -> Option<&'t str> {
        match self.wildcard_at {
            None => (self.raw == target).then_some(""),
            Some(at) => {
                let prefix = &self.raw[..at];
                let suffix = &self.raw[at + 1..];
                if target.len() < prefix.len() + suffix.len() {
                    return None;
                }
                if !target.starts_with(prefix) || !target.ends_with(suffix) {
                    return None;
                }
                Some(&target[prefix.len()..target.len() - suffix.len()])
            }
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Replace the single `%` in `template` with `stem`. Templates without
/// a wildcard come back verbatim.
pub fn substitute(template: &str, stem: &str) -> String {
    match template.find(WILDCARD) {
        Some(at) => {
            let mut out = String::with_capacity(template.len() + stem.len());
            out.push_str(&template[..at]);
            out.push_str(stem);
            out.push_str(&template[at + 1..]);
            out
        }
        None => template.to_string(),
    }
}
