//! Path pattern language shared by firewall zones and access-control rules.
//!
//! Two forms are understood:
//! - `value:index` matches when the zero-based path segment at `index` equals
//!   `value`. Segments are taken after trimming leading and trailing `/` and
//!   splitting on `/`.
//! - anything else is a path prefix, normalized to begin with `/`, matched with
//!   a plain prefix comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("invalid segment index in pattern '{0}'")]
    InvalidSegmentIndex(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PathPattern {
    Segment { value: String, index: usize },
    Prefix(String),
}

impl PathPattern {
    /// Parse a pattern string.
    ///
    /// # Errors
    /// Returns an error when a `value:index` pattern carries a non-numeric index.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if let Some((value, index)) = pattern.rsplit_once(':') {
            let index = index
                .trim()
                .parse::<usize>()
                .map_err(|_| PatternError::InvalidSegmentIndex(pattern.to_string()))?;
            return Ok(Self::Segment {
                value: value.trim_matches('/').to_string(),
                index,
            });
        }

        Ok(Self::Prefix(format!("/{}", pattern.trim_start_matches('/'))))
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Segment { value, index } => path
                .trim_matches('/')
                .split('/')
                .nth(*index)
                .is_some_and(|segment| segment == value),
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segment { value, index } => write!(f, "{value}:{index}"),
            Self::Prefix(prefix) => f.write_str(prefix),
        }
    }
}

impl TryFrom<String> for PathPattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{PathPattern, PatternError};

    #[test]
    fn prefix_is_normalized_with_leading_slash() {
        assert_eq!(
            PathPattern::parse("admin"),
            Ok(PathPattern::Prefix("/admin".to_string()))
        );
        assert_eq!(
            PathPattern::parse("/api"),
            Ok(PathPattern::Prefix("/api".to_string()))
        );
    }

    #[test]
    fn prefix_matches_by_comparison() {
        let pattern = PathPattern::Prefix("/admin".to_string());
        assert!(pattern.matches("/admin"));
        assert!(pattern.matches("/admin/users"));
        assert!(pattern.matches("/administrator"));
        assert!(!pattern.matches("/api/admin"));
    }

    #[test]
    fn root_prefix_matches_everything() -> anyhow::Result<()> {
        let pattern = PathPattern::parse("/")?;
        assert!(pattern.matches("/"));
        assert!(pattern.matches("/anything/at/all"));
        Ok(())
    }

    #[test]
    fn segment_pattern_checks_indexed_segment() {
        let pattern = PathPattern::parse("api:0");
        assert_eq!(
            pattern,
            Ok(PathPattern::Segment {
                value: "api".to_string(),
                index: 0
            })
        );
        let Ok(pattern) = pattern else { return };
        assert!(pattern.matches("/api/users"));
        assert!(pattern.matches("api/"));
        assert!(!pattern.matches("/v1/api/users"));
        assert!(!pattern.matches("/apis"));
    }

    #[test]
    fn segment_pattern_ignores_surrounding_slashes() {
        let Ok(pattern) = PathPattern::parse("admin:1") else {
            panic!("pattern should parse");
        };
        assert!(pattern.matches("/tenant/admin/"));
        assert!(pattern.matches("tenant/admin/settings"));
        assert!(!pattern.matches("/admin"));
    }

    #[test]
    fn segment_pattern_rejects_non_numeric_index() {
        assert_eq!(
            PathPattern::parse("api:first"),
            Err(PatternError::InvalidSegmentIndex("api:first".to_string()))
        );
    }

    #[test]
    fn deserializes_from_string() -> anyhow::Result<()> {
        let pattern: PathPattern = serde_json::from_str("\"secure:0\"")?;
        assert!(pattern.matches("/secure/area"));
        let prefix: PathPattern = serde_json::from_str("\"login\"")?;
        assert_eq!(prefix.to_string(), "/login");
        Ok(())
    }
}
