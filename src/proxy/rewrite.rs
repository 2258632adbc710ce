//! Glob-style URL rewriting.
//!
//! Rules are `(from, to)` pairs. `from` is a literal path where `*` matches
//! anything (lazily) and a leading `^` anchors at the start; every rule is
//! implicitly anchored at the end. `to` may reference the wildcards as
//! `$1..$n`. Rules are tried in order and at most one applies.

use axum::http::uri::{PathAndQuery, Uri};
use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    replacement: String,
}

/// Compiled rewrite rules.
#[derive(Debug, Clone, Default)]
pub struct RewriteRules {
    rules: Vec<Rule>,
}

/// Translate a glob rule into a regex source.
fn glob_to_regex(glob: &str) -> String {
    let mut source = regex::escape(glob).replace(r"\*", "(.*?)");
    if let Some(rest) = source.strip_prefix(r"\^") {
        source = format!("^{rest}");
    }
    source.push('$');
    source
}

/// Expand `$n` references against `captures`; unknown indexes stay literal.
fn expand(template: &str, captures: &regex::Captures<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + d.len_utf8();
            chars.next();
        }
        let group = template[start..end]
            .parse::<usize>()
            .ok()
            .filter(|&n| n > 0)
            .and_then(|n| captures.get(n));
        match group {
            Some(m) => out.push_str(m.as_str()),
            None => out.push_str(&template[i..end]),
        }
    }
    out
}

impl RewriteRules {
    pub fn compile<I, K, V>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let rules = rules
            .into_iter()
            .map(|(from, to)| {
                let from = from.as_ref();
                let pattern =
                    Regex::new(&glob_to_regex(from)).map_err(|source| Error::InvalidRewrite {
                        rule: from.to_string(),
                        source,
                    })?;
                Ok(Rule {
                    pattern,
                    replacement: to.into(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Rewrite a path-and-query string with the first matching rule.
    pub fn rewrite(&self, path_and_query: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| {
            let captures = rule.pattern.captures(path_and_query)?;
            Some(expand(&rule.replacement, &captures))
        })
    }

    /// Rewrite the path and query of `uri`, keeping scheme and authority.
    /// `Ok(None)` when no rule matched.
    pub fn rewrite_uri(&self, uri: &Uri) -> std::result::Result<Option<Uri>, axum::http::Error> {
        let current = uri.path_and_query().map(PathAndQuery::as_str).unwrap_or("/");
        let Some(rewritten) = self.rewrite(current) else {
            return Ok(None);
        };
        let rewritten = if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{rewritten}")
        };

        let mut builder = Uri::builder();
        if let Some(scheme) = uri.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = uri.authority() {
            builder = builder.authority(authority.clone());
        }
        builder.path_and_query(rewritten).build().map(Some)
    }
}
