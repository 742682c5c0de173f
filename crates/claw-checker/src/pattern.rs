//! Graphite-style metric patterns.
//!
//! A pattern is a dot-separated path whose nodes may contain `*`, `?`,
//! character classes `[...]` and alternatives `{a,b}`. Wildcards never
//! cross a `.` boundary.

use regex::Regex;

/// A compiled metric pattern.
#[derive(Debug, Clone)]
pub struct MetricPattern {
    source: String,
    regex: Regex,
}

impl MetricPattern {
    /// Compiles a pattern.
    ///
    /// Returns `None` if the pattern has unbalanced braces or brackets.
    #[must_use]
    pub fn new(pattern: &str) -> Option<Self> {
        let regex = Regex::new(&to_regex(pattern)?).ok()?;
        Some(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Returns the pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Checks whether a metric name matches the pattern.
    #[must_use]
    pub fn matches(&self, metric: &str) -> bool {
        self.regex.is_match(metric)
    }
}

/// Returns true if the text contains any pattern syntax.
#[must_use]
pub fn is_pattern(text: &str) -> bool {
    text.contains(['*', '?', '[', '{'])
}

fn to_regex(pattern: &str) -> Option<String> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut in_braces = false;
    let mut in_brackets = false;

    for c in pattern.chars() {
        match c {
            '*' if !in_brackets => out.push_str("[^.]*"),
            '?' if !in_brackets => out.push_str("[^.]"),
            '{' if !in_brackets && !in_braces => {
                in_braces = true;
                out.push_str("(?:");
            }
            '}' if in_braces => {
                in_braces = false;
                out.push(')');
            }
            ',' if in_braces => out.push('|'),
            '[' if !in_brackets => {
                in_brackets = true;
                out.push('[');
            }
            ']' if in_brackets => {
                in_brackets = false;
                out.push(']');
            }
            '-' | '^' if in_brackets => out.push(c),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    if in_braces || in_brackets {
        return None;
    }
    out.push('$');
    Some(out)
}
