//! Path utilities.
//!
//! Logical paths are `/`-separated and relative to the project root. They
//! never leave the project: `..` components are rejected and `.` or empty
//! components are dropped.

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{ProjectError, Result};

// =============================================================================
// LogicalPath
// =============================================================================

/// A normalized path relative to the project root.
///
/// The empty path denotes the root itself. Depth is the component count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalPath(String);

impl LogicalPath {
    /// The project root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and normalize a relative path.
    pub fn parse(path: &str) -> Result<Self> {
        let mut parts = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => return Err(ProjectError::invalid_path(path, "'..' is not allowed")),
                part => parts.push(part),
            }
        }
        Ok(Self(parts.join("/")))
    }

    /// The normalized string form, empty for the root.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the project root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of components.
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Iterate the components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// The first `n` components.
    pub fn prefix(&self, n: usize) -> Self {
        Self(self.components().take(n).collect::<Vec<_>>().join("/"))
    }

    /// Everything after the first `n` components.
    pub fn suffix(&self, n: usize) -> Self {
        Self(self.components().skip(n).collect::<Vec<_>>().join("/"))
    }

    /// Last component.
    pub fn file_name(&self) -> Option<&str> {
        self.components().last()
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        })
    }

    /// Append another logical path.
    pub fn join(&self, other: &LogicalPath) -> Self {
        match (self.is_root(), other.is_root()) {
            (true, _) => other.clone(),
            (_, true) => self.clone(),
            _ => Self(format!("{}/{}", self.0, other.0)),
        }
    }

    /// Append a single entry name.
    pub(crate) fn child(&self, name: &str) -> Self {
        self.join(&Self(name.to_string()))
    }

    /// Component-wise prefix check. Every path starts with the root.
    pub fn starts_with(&self, prefix: &LogicalPath) -> bool {
        prefix.is_root()
            || self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/'))
    }

    /// Remove a component-wise prefix.
    pub fn strip_prefix(&self, prefix: &LogicalPath) -> Option<Self> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        Some(Self(
            self.0[prefix.0.len()..].trim_start_matches('/').to_string(),
        ))
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

// =============================================================================
// GlobMatcher
// =============================================================================

/// Glob pattern matched against entry names.
///
/// Supports `*`, `?`, `**`, character classes (`[a-z]`, `[!x]`) and
/// alternatives (`{a,b}`).
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    regex: Regex,
}

impl GlobMatcher {
    /// Compile a glob.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|source| ProjectError::Glob {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    /// Check a name against the pattern.
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut braces = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' => {
                braces += 1;
                out.push_str("(?:");
            }
            '}' if braces > 0 => {
                braces -= 1;
                out.push(')');
            }
            ',' if braces > 0 => out.push('|'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if c == '\\' || c == '[' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push(']');
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

// =============================================================================
// Helpers
// =============================================================================

/// Normalize a real filesystem location to absolute form.
///
/// Tries `canonicalize()` first (resolves symlinks, `.`, `..`).
/// Falls back to:
/// - Return as-is if already absolute
/// - Join with current directory if relative
pub fn normalize_location(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

/// Decode bytes as UTF-8, stripping BOM if present.
pub fn decode_utf8<'a>(path: &str, buf: &'a [u8]) -> Result<&'a str> {
    let buf = buf.strip_prefix(b"\xef\xbb\xbf").unwrap_or(buf);
    std::str::from_utf8(buf).map_err(|e| ProjectError::InvalidData {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        let path = LogicalPath::parse("/a//./b/c/").unwrap();
        assert_eq!(path.as_str(), "a/b/c");
        assert_eq!(path.depth(), 3);
        assert!(LogicalPath::parse("").unwrap().is_root());
        assert!(LogicalPath::parse("/").unwrap().is_root());
    }

    #[test]
    fn test_parse_rejects_parent() {
        assert!(LogicalPath::parse("a/../b").is_err());
    }

    #[test]
    fn test_prefix_and_suffix() {
        let path = LogicalPath::parse("a/b/c").unwrap();
        assert_eq!(path.prefix(1).as_str(), "a");
        assert_eq!(path.suffix(1).as_str(), "b/c");
        assert_eq!(path.prefix(5), path);
        assert!(path.suffix(3).is_root());
    }

    #[test]
    fn test_starts_with_is_component_wise() {
        let path = LogicalPath::parse("ab/c").unwrap();
        assert!(path.starts_with(&LogicalPath::parse("ab").unwrap()));
        assert!(!path.starts_with(&LogicalPath::parse("a").unwrap()));
        assert!(path.starts_with(&LogicalPath::root()));
        assert_eq!(
            path.strip_prefix(&LogicalPath::parse("ab").unwrap()).unwrap().as_str(),
            "c"
        );
        assert!(path.strip_prefix(&LogicalPath::parse("x").unwrap()).is_none());
    }

    #[test]
    fn test_parent_and_join() {
        let path = LogicalPath::parse("a/b").unwrap();
        assert_eq!(path.parent().unwrap().as_str(), "a");
        assert!(path.parent().unwrap().parent().unwrap().is_root());
        assert!(LogicalPath::root().parent().is_none());
        assert_eq!(LogicalPath::root().join(&path), path);
        assert_eq!(path.child("c").as_str(), "a/b/c");
        assert_eq!(path.file_name(), Some("b"));
    }

    #[test]
    fn test_glob_star() {
        let glob = GlobMatcher::new("*.tsv").unwrap();
        assert!(glob.is_match("scores.tsv"));
        assert!(!glob.is_match("scores.csv"));
        assert!(!glob.is_match("dir/scores.tsv"));
    }

    #[test]
    fn test_glob_alternatives_and_classes() {
        let glob = GlobMatcher::new("{spectrum,tree}[0-9].?s").unwrap();
        assert!(glob.is_match("tree1.ms"));
        assert!(glob.is_match("spectrum7.js"));
        assert!(!glob.is_match("trees.ms"));

        let negated = GlobMatcher::new("[!.]*").unwrap();
        assert!(negated.is_match("visible"));
        assert!(!negated.is_match(".hidden"));
    }

    #[test]
    fn test_glob_escapes_regex_chars() {
        let glob = GlobMatcher::new("a+b(1).txt").unwrap();
        assert!(glob.is_match("a+b(1).txt"));
        assert!(!glob.is_match("aab(1)xtxt"));
    }

    #[test]
    fn test_decode_utf8_strips_bom() {
        let mut bytes = vec![0xef, 0xbb, 0xbf];
        bytes.extend_from_slice(b"Hello");
        assert_eq!(decode_utf8("x", &bytes).unwrap(), "Hello");
        assert!(decode_utf8("x", &[0xff, 0xfe]).is_err());
    }
}
