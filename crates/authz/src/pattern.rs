//! Segment-wise wildcard patterns for roles, resources, and actions.
//!
//! Values are `:`-separated segments such as `org:read` or `document:42`.
//! A pattern segment is either literal or ends in `*`, in which case it
//! matches any segment starting with the text before the `*`. A wildcard in
//! the last pattern segment also absorbs any further value segments, so
//! `org:*` matches `org:read` and `org:team:invite` but not `billing:read`.
//! Matching is case-sensitive.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AuthzError;

/// Separator between segments.
pub const SEGMENT_SEPARATOR: char = ':';

const WILDCARD: char = '*';

/// Separator inside decision cache fields; never valid in a checked value.
pub(crate) const FIELD_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Exact(String),
    /// Matches any segment with this prefix. An empty prefix matches any
    /// segment.
    Prefix(String),
}

impl Segment {
    fn matches(&self, part: &str) -> bool {
        match self {
            Segment::Exact(expected) => part == expected,
            Segment::Prefix(prefix) => part.starts_with(prefix.as_str()),
        }
    }
}

/// A compiled pattern.
///
/// # Examples
///
/// ```
/// use trustcore_authz::Pattern;
///
/// let pattern = Pattern::parse("org:*").unwrap();
/// assert!(pattern.matches("org:read"));
/// assert!(pattern.matches("org:write"));
/// assert!(!pattern.matches("billing:read"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses and validates a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidPattern`] if the pattern is empty,
    /// contains whitespace or an empty segment, or has a `*` anywhere but at
    /// the end of a segment.
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        check_shape(raw)?;
        let mut segments = Vec::new();
        for part in raw.split(SEGMENT_SEPARATOR) {
            let segment = match part.find(WILDCARD) {
                None => Segment::Exact(part.to_owned()),
                Some(pos) if pos + 1 == part.len() => Segment::Prefix(part[..pos].to_owned()),
                Some(_) => {
                    return Err(AuthzError::invalid_pattern(raw, "wildcard must end its segment"));
                },
            };
            segments.push(segment);
        }
        Ok(Self { raw: raw.to_owned(), segments })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `true` if the pattern has no wildcard.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Exact(_)))
    }

    /// Matches a concrete value. Values are expected to have passed
    /// [`validate_value`].
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        let parts: Vec<&str> = value.split(SEGMENT_SEPARATOR).collect();
        let last = self.segments.len() - 1;

        for (i, segment) in self.segments.iter().enumerate() {
            let Some(part) = parts.get(i) else {
                return false;
            };
            if !segment.matches(part) {
                return false;
            }
            if i == last {
                return match segment {
                    Segment::Exact(_) => parts.len() == self.segments.len(),
                    Segment::Prefix(_) => true,
                };
            }
        }
        false
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for Pattern {
    type Error = AuthzError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.raw
    }
}

/// Checks that a resource or action passed to a check is a concrete value:
/// well-formed segments, no wildcard, and no `|` (reserved for decision
/// cache keys).
///
/// # Errors
///
/// Returns [`AuthzError::InvalidPattern`] describing the problem.
pub fn validate_value(value: &str) -> Result<(), AuthzError> {
    check_shape(value)?;
    if value.contains(WILDCARD) {
        return Err(AuthzError::invalid_pattern(value, "wildcards are only allowed in grants"));
    }
    if value.contains(FIELD_SEPARATOR) {
        return Err(AuthzError::invalid_pattern(value, "contains '|'"));
    }
    Ok(())
}

fn check_shape(raw: &str) -> Result<(), AuthzError> {
    if raw.is_empty() {
        return Err(AuthzError::invalid_pattern(raw, "empty"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(AuthzError::invalid_pattern(raw, "contains whitespace"));
    }
    if raw.split(SEGMENT_SEPARATOR).any(str::is_empty) {
        return Err(AuthzError::invalid_pattern(raw, "empty segment"));
    }
    Ok(())
}
