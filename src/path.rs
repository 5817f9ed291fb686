//! Store key sanitization and path building.
//!
//! The tree store forbids `. $ # [ ] /` inside a key. Every segment that goes
//! into a store path passes through [`sanitize_key`], so raw separators from
//! team names, bookmaker ids or line strings never split or corrupt a path.

use std::fmt;

const RESERVED: [char; 6] = ['.', '$', '#', '[', ']', '/'];

/// Placeholder used for empty or missing keys.
pub const UNKNOWN_KEY: &str = "unknown";

/// Replace every reserved character with `_`. Empty or missing keys become
/// `"unknown"`.
pub fn sanitize_key(key: Option<&str>) -> String {
    match key {
        Some(k) if !k.is_empty() => k
            .chars()
            .map(|c| if RESERVED.contains(&c) { '_' } else { c })
            .collect(),
        _ => UNKNOWN_KEY.to_string(),
    }
}

/// Sanitize a slash-delimited path segment by segment.
///
/// Leading, trailing and repeated slashes are treated as separator noise and
/// dropped rather than turned into `unknown` segments.
pub fn sanitize_path(raw: &str) -> String {
    raw.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| sanitize_key(Some(s)))
        .collect::<Vec<_>>()
        .join("/")
}

/// A store path assembled from individually sanitized segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse an already slash-delimited path (e.g. a configured metrics root).
    pub fn parse(raw: &str) -> Self {
        Self {
            segments: raw
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| sanitize_key(Some(s)))
                .collect(),
        }
    }

    /// Append one key; any `/` inside it is sanitized, never treated as a separator.
    pub fn child(mut self, key: impl AsRef<str>) -> Self {
        self.segments.push(sanitize_key(Some(key.as_ref())));
        self
    }

    pub fn push(&mut self, key: impl AsRef<str>) {
        self.segments.push(sanitize_key(Some(key.as_ref())));
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Build a path from a list of keys: `store_path!["matches", lid, fid]`.
#[macro_export]
macro_rules! store_path {
    ($($seg:expr),+ $(,)?) => {{
        let mut p = $crate::path::StorePath::root();
        $( p.push(::std::string::ToString::to_string(&$seg)); )+
        p
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_characters_become_underscores() {
        assert_eq!(sanitize_key(Some("a.b$c")), "a_b_c");
        assert_eq!(sanitize_key(Some("x#y[z]/w")), "x_y_z__w");
    }

    #[test]
    fn empty_or_missing_key_is_unknown() {
        assert_eq!(sanitize_key(Some("")), "unknown");
        assert_eq!(sanitize_key(None), "unknown");
    }

    #[test]
    fn sanitize_path_keeps_separators_but_cleans_segments() {
        assert_eq!(sanitize_path("/_ops/metrics/"), "_ops/metrics");
        assert_eq!(sanitize_path("matches/39/1.5"), "matches/39/1_5");
        assert_eq!(sanitize_path("a//b"), "a/b");
    }

    #[test]
    fn child_never_splits_on_slash() {
        let p = StorePath::root().child("teams").child("Brighton/Hove");
        assert_eq!(p.to_string(), "teams/Brighton_Hove");
        assert_eq!(p.segments().len(), 2);
    }

    #[test]
    fn macro_accepts_mixed_types() {
        let p = store_path!["matches", 39, 1035037_u64, "ou", "2.5"];
        assert_eq!(p.to_string(), "matches/39/1035037/ou/2_5");
    }
}
