//! Route pattern compilation.
//!
//! # Responsibilities
//! - Classify a pattern into the exact, prefix-priority or generic bucket
//! - Rewrite generic patterns into an end-anchored regular expression
//! - Remember the parameter names in scan order
//!
//! # Pattern Syntax
//! ```text
//! = /api/v1/test        exact, case-insensitive, no parameters
//! ~ /static/*file       prefix-priority, checked before generic patterns
//! /cmd/:tool/*rest      generic; `:name` and `*name` capture lazily
//! ^/only/at/start       leading `^` anchors the regex at the start too
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Marker for exact-match patterns.
pub const EXACT_MARKER: &str = "= ";
/// Marker for prefix-priority patterns.
pub const PREFIX_MARKER: &str = "~ ";

/// Named parameter token inside a rewritten pattern.
static NAMED_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(":[A-Za-z0-9_]+").expect("static regex"));

/// Which bucket a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Exact,
    Prefix,
    Generic,
}

/// A route pattern compiled for matching.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    kind: PatternKind,
    /// Pattern as registered, minus the bucket marker.
    original: String,
    /// Escaped template before tokens become capture groups.
    rewritten: String,
    regex: Option<Regex>,
    keys: Vec<String>,
    index: usize,
}

impl CompiledPattern {
    /// Compile `pattern`, which was registered as route number `index`.
    pub fn compile(pattern: &str, index: usize) -> Self {
        if let Some(literal) = pattern.strip_prefix(EXACT_MARKER) {
            return Self {
                kind: PatternKind::Exact,
                original: literal.to_string(),
                rewritten: literal.to_string(),
                regex: None,
                keys: Vec::new(),
                index,
            };
        }

        let (kind, path) = match pattern.strip_prefix(PREFIX_MARKER) {
            Some(rest) => (PatternKind::Prefix, rest),
            None => (PatternKind::Generic, pattern),
        };

        let mut rewritten = regex::escape(path).replace(r"\*", ":");
        if let Some(rest) = rewritten.strip_prefix(r"\^") {
            rewritten = format!("^{rest}");
        }

        let keys = NAMED_PARAM
            .find_iter(&rewritten)
            .map(|m| m.as_str()[1..].to_string())
            .collect();
        let source = format!("{}$", NAMED_PARAM.replace_all(&rewritten, "(.*?)"));
        // Every literal was escaped above, so the result is always a valid regex.
        let regex = Regex::new(&source).expect("escaped route pattern compiles");

        Self {
            kind,
            original: path.to_string(),
            rewritten,
            regex: Some(regex),
            keys,
            index,
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn rewritten(&self) -> &str {
        &self.rewritten
    }

    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }

    /// Parameter names in left-to-right order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Index of the originating route in its method table.
    pub fn index(&self) -> usize {
        self.index
    }
}
