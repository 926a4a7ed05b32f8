//! Glob patterns for cache key matching.
//!
//! The grammar is deliberately small:
//!
//! - `*` matches any sequence of characters, including the empty one.
//! - `\` makes the next character literal, so `\*` is a literal star and
//!   `\\` a literal backslash. A trailing lone `\` is itself literal.
//! - Every other character, `?` and `[` included, matches only itself.
//!
//! Matches are anchored to the whole key: `user:*` matches `user:1` but not
//! `admin:user:1`.

use std::fmt;

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    /// Literal runs between stars. `parts.len() - 1` is the number of stars.
    parts: Vec<String>,
}

impl GlobPattern {
    /// Compile a pattern.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let mut parts = vec![String::new()];
        let mut chars = pattern.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let literal = chars.next().unwrap_or('\\');
                    if let Some(last) = parts.last_mut() {
                        last.push(literal);
                    }
                }
                '*' => {
                    // Runs of stars collapse into one.
                    if parts.len() == 1 || parts.last().is_some_and(|p| !p.is_empty()) {
                        parts.push(String::new());
                    }
                }
                other => {
                    if let Some(last) = parts.last_mut() {
                        last.push(other);
                    }
                }
            }
        }

        Self {
            source: pattern.to_string(),
            parts,
        }
    }

    /// Get the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check if the pattern contains no wildcard.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.parts.len() == 1
    }

    /// Get the key a wildcard-free pattern stands for.
    #[must_use]
    pub fn literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// Check if `key` matches the whole pattern.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        let (first, rest_parts) = match self.parts.split_first() {
            Some(split) => split,
            None => return key.is_empty(),
        };
        let Some((last, middle)) = rest_parts.split_last() else {
            return key == first.as_str();
        };

        let Some(mut rest) = key.strip_prefix(first.as_str()) else {
            return false;
        };
        rest = match rest.strip_suffix(last.as_str()) {
            Some(r) => r,
            None => return false,
        };

        for part in middle {
            match rest.find(part.as_str()) {
                Some(i) => rest = &rest[i + part.len()..],
                None => return false,
            }
        }
        true
    }

    /// Render as a Redis `SCAN MATCH` pattern, escaping Redis' extra
    /// metacharacters so they stay literal.
    #[must_use]
    pub fn to_redis_pattern(&self) -> String {
        let escaped: Vec<String> = self
            .parts
            .iter()
            .map(|part| {
                let mut out = String::with_capacity(part.len());
                for c in part.chars() {
                    if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out
            })
            .collect();
        escaped.join("*")
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<&str> for GlobPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}
