//! Path patterns and request path normalization.
//!
//! Rule patterns are prefix patterns over `/`-separated segments: `/a/b`
//! covers `/a/b` and everything beneath it, but not `/a/bc`. Patterns must be
//! written in normalized form; request paths are normalized leniently but
//! never resolve `..`.

use crate::{MAX_PATH_DEPTH, MAX_PATH_LENGTH};

/// A validated rule path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    pattern: String,
    segments: Vec<String>,
}

impl PathPattern {
    /// Validate and split a rule path pattern.
    ///
    /// # Errors
    ///
    /// Returns the reason the pattern was rejected: not absolute, empty or
    /// traversal segments, trailing slash, NUL bytes, or exceeding
    /// `MAX_PATH_LENGTH` / `MAX_PATH_DEPTH`.
    ///
    /// # Example
    ///
    /// ```
    /// use rbacfs_policy::PathPattern;
    ///
    /// let p = PathPattern::new("/docs/secret").unwrap();
    /// assert_eq!(p.segments(), ["docs", "secret"]);
    /// assert!(PathPattern::new("/").unwrap().segments().is_empty());
    /// assert!(PathPattern::new("docs").is_err());
    /// assert!(PathPattern::new("/docs/../etc").is_err());
    /// ```
    pub fn new(pattern: impl Into<String>) -> Result<Self, String> {
        let pattern = pattern.into();

        if pattern.len() > MAX_PATH_LENGTH {
            return Err(format!(
                "exceeds maximum length of {} bytes (length: {})",
                MAX_PATH_LENGTH,
                pattern.len()
            ));
        }
        if pattern.contains('\0') {
            return Err("contains a NUL byte".to_string());
        }
        let Some(rest) = pattern.strip_prefix('/') else {
            return Err("must be absolute".to_string());
        };

        let mut segments = Vec::new();
        if !rest.is_empty() {
            for segment in rest.split('/') {
                match segment {
                    "" => {
                        return Err(if rest.ends_with('/') {
                            "trailing slash".to_string()
                        } else {
                            "empty segment".to_string()
                        })
                    }
                    "." | ".." => return Err(format!("traversal segment `{segment}`")),
                    s => segments.push(s.to_string()),
                }
            }
        }

        if segments.len() > MAX_PATH_DEPTH {
            return Err(format!(
                "exceeds maximum depth of {} segments (depth: {})",
                MAX_PATH_DEPTH,
                segments.len()
            ));
        }

        Ok(Self { pattern, segments })
    }

    /// Get the pattern string.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Get the pattern segments (empty for `/`).
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub(crate) fn into_parts(self) -> (String, Vec<String>) {
        (self.pattern, self.segments)
    }
}

/// Split a request path into segments.
///
/// Empty and `.` segments are dropped, so `//docs/./a` is `["docs", "a"]`
/// and a relative path is treated as rooted. Returns `None` for `..`
/// segments or NUL bytes: a request path is never resolved lexically, since
/// the result could name a different backing file than the one checked.
pub fn normalize(path: &str) -> Option<Vec<&str>> {
    if path.contains('\0') {
        return None;
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_root() {
        let p = PathPattern::new("/").unwrap();
        assert_eq!(p.as_str(), "/");
        assert!(p.segments().is_empty());
    }

    #[test]
    fn test_pattern_rejections() {
        assert_eq!(PathPattern::new("").unwrap_err(), "must be absolute");
        assert_eq!(PathPattern::new("docs/a").unwrap_err(), "must be absolute");
        assert_eq!(PathPattern::new("/docs/").unwrap_err(), "trailing slash");
        assert_eq!(PathPattern::new("/docs//a").unwrap_err(), "empty segment");
        assert_eq!(PathPattern::new("/docs/./a").unwrap_err(), "traversal segment `.`");
        assert_eq!(PathPattern::new("/..").unwrap_err(), "traversal segment `..`");
        assert_eq!(PathPattern::new("/a\0b").unwrap_err(), "contains a NUL byte");
    }

    #[test]
    fn test_pattern_limits() {
        let deep = "/a".repeat(MAX_PATH_DEPTH + 1);
        assert!(PathPattern::new(deep).unwrap_err().contains("maximum depth"));

        let long = format!("/{}", "x".repeat(MAX_PATH_LENGTH));
        assert!(PathPattern::new(long).unwrap_err().contains("maximum length"));

        let ok = "/a".repeat(MAX_PATH_DEPTH);
        assert_eq!(PathPattern::new(ok).unwrap().segments().len(), MAX_PATH_DEPTH);
    }

    #[test]
    fn test_pattern_allows_odd_names() {
        let p = PathPattern::new("/my docs/...hidden/a.b").unwrap();
        assert_eq!(p.segments(), ["my docs", "...hidden", "a.b"]);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/"), Some(vec![]));
        assert_eq!(normalize(""), Some(vec![]));
        assert_eq!(normalize("/docs/readme.txt"), Some(vec!["docs", "readme.txt"]));
        assert_eq!(normalize("//docs/./a/"), Some(vec!["docs", "a"]));
        assert_eq!(normalize("docs"), Some(vec!["docs"]));
        assert_eq!(normalize("/docs/../etc"), None);
        assert_eq!(normalize("/a\0"), None);
    }
}
