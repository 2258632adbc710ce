//! Route matching logic.
//!
//! # Responsibilities
//! - Hold the compiled patterns of one method table, split into buckets
//! - Resolve a raw request path to a route index plus ordered parameters
//!
//! # Design Decisions
//! - Exact bucket first (case-insensitive equality), then prefix-priority,
//!   then generic
//! - Regex buckets scan every pattern and rank the hits: O(n) per request,
//!   acceptable for typical route counts
//! - Explicit `None` rather than a silent default route

use regex::Captures;

use crate::routing::pattern::{CompiledPattern, PatternKind};

/// A single URL parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered URL parameters; the first pattern token is the first entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the first parameter named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.key == name)
            .map(|p| p.value.as_str())
    }

    /// Like `get`, but an unknown name yields an empty string.
    pub fn by_name(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    pub fn values(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.value.as_str()).collect()
    }

    pub fn push(&mut self, param: Param) {
        self.0.push(param);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop all entries, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl FromIterator<Param> for Params {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub route_index: usize,
    pub params: Params,
    pub matched_pattern: String,
}

/// Compiled patterns for one HTTP method.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    exact: Vec<CompiledPattern>,
    prefix: Vec<CompiledPattern>,
    generic: Vec<CompiledPattern>,
}

impl PathMatcher {
    /// Compile every pattern; route indexes follow slice order.
    pub fn build<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut matcher = Self::default();
        for (index, pattern) in patterns.iter().enumerate() {
            let compiled = CompiledPattern::compile(pattern.as_ref(), index);
            match compiled.kind() {
                PatternKind::Exact => matcher.exact.push(compiled),
                PatternKind::Prefix => matcher.prefix.push(compiled),
                PatternKind::Generic => matcher.generic.push(compiled),
            }
        }
        matcher
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefix.len() + self.generic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve `path` to the best registered pattern.
    pub fn find(&self, path: &str) -> Option<MatchResult> {
        if let Some(hit) = self
            .exact
            .iter()
            .find(|p| p.original().eq_ignore_ascii_case(path))
        {
            return Some(MatchResult {
                route_index: hit.index(),
                params: Params::new(),
                matched_pattern: hit.original().to_string(),
            });
        }

        best_match(&self.prefix, path).or_else(|| best_match(&self.generic, path))
    }
}

/// Ranking key of a regex hit; larger wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    literal: bool,
    groups: usize,
    pattern_len: usize,
}

fn best_match(patterns: &[CompiledPattern], path: &str) -> Option<MatchResult> {
    let mut best: Option<(Rank, &CompiledPattern, Captures<'_>)> = None;

    for pattern in patterns {
        let Some(regex) = pattern.regex() else {
            continue;
        };
        let Some(caps) = regex.captures(path) else {
            continue;
        };

        let groups = caps.len() - 1;
        if groups > 0 && caps.get(groups).map_or(true, |m| m.as_str().is_empty()) {
            continue;
        }

        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let rank = Rank {
            literal: groups == 0 && whole == (0..path.len()),
            groups,
            pattern_len: pattern.rewritten().len(),
        };

        // Strictly greater keeps the earliest registration on full ties.
        if best.as_ref().map_or(true, |(current, _, _)| rank > *current) {
            best = Some((rank, pattern, caps));
        }
    }

    let (_, pattern, caps) = best?;
    let params = pattern
        .keys()
        .iter()
        .zip(caps.iter().skip(1))
        .map(|(key, value)| {
            let value = value.map_or("", |m| m.as_str());
            Param::new(key.as_str(), value.strip_suffix('/').unwrap_or(value))
        })
        .collect();

    Some(MatchResult {
        route_index: pattern.index(),
        params,
        matched_pattern: pattern.original().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| Param::new(*k, *v)).collect()
    }

    fn check(matcher: &PathMatcher, path: &str, pattern: &str, expected: &[(&str, &str)]) {
        let hit = matcher
            .find(path)
            .unwrap_or_else(|| panic!("{path} should match {pattern}"));
        assert_eq!(hit.matched_pattern, pattern, "path {path}");
        assert_eq!(hit.params, params(expected), "path {path}");
    }

    #[test]
    fn test_rewrite_style_patterns() {
        let matcher = PathMatcher::build(&[
            "/abc/*path",
            "/abc/*name/abcd/*param",
            "/api/*name",
            "= /api/v1/test",
        ]);

        check(&matcher, "/abc/v1", "/abc/*path", &[("path", "v1")]);
        check(
            &matcher,
            "/abc/v1/abcd/aaaa",
            "/abc/*name/abcd/*param",
            &[("name", "v1"), ("param", "aaaa")],
        );
        check(&matcher, "/api/v1", "/api/*name", &[("name", "v1")]);
        check(&matcher, "/api/v1/test", "/api/v1/test", &[]);
        check(&matcher, "/API/V1/TEST", "/api/v1/test", &[]);
        assert!(matcher.find("/cccc").is_none());
        assert!(matcher.find("/ann/v1").is_none());
    }

    #[test]
    fn test_route_table() {
        let matcher = PathMatcher::build(&[
            "/",
            "/cmd/:tool",
            "/cmd/:tool/",
            "/cmd/:tool/:sub",
            "/cmd/whoami",
            "/src/*filepath",
            "/search/:query",
            "/user_:name",
            "/user_:name/about",
            "/files/:dir/*filepath",
            "/info/:user/public",
            "/info/:user/project/:project",
            "/info/:user/project/golang",
        ]);

        check(&matcher, "/", "/", &[]);
        check(&matcher, "/cmd/test", "/cmd/:tool", &[("tool", "test")]);
        check(&matcher, "/cmd/test/", "/cmd/:tool/", &[("tool", "test")]);
        check(
            &matcher,
            "/cmd/test/3",
            "/cmd/:tool/:sub",
            &[("tool", "test"), ("sub", "3")],
        );
        check(&matcher, "/cmd/whoami", "/cmd/whoami", &[]);
        check(
            &matcher,
            "/cmd/whoami/r",
            "/cmd/:tool/:sub",
            &[("tool", "whoami"), ("sub", "r")],
        );
        check(
            &matcher,
            "/cmd/whoami/r/",
            "/cmd/:tool/:sub",
            &[("tool", "whoami"), ("sub", "r")],
        );
        check(
            &matcher,
            "/src/some/file.png",
            "/src/*filepath",
            &[("filepath", "some/file.png")],
        );
        check(
            &matcher,
            "/search/someth!ng+in+ünìcodé/",
            "/search/:query",
            &[("query", "someth!ng+in+ünìcodé")],
        );
        check(
            &matcher,
            "/user_gopher",
            "/user_:name",
            &[("name", "gopher")],
        );
        check(
            &matcher,
            "/user_gopher/about",
            "/user_:name/about",
            &[("name", "gopher")],
        );
        check(
            &matcher,
            "/files/js/inc/framework.js",
            "/files/:dir/*filepath",
            &[("dir", "js"), ("filepath", "inc/framework.js")],
        );
        check(
            &matcher,
            "/info/gordon/public",
            "/info/:user/public",
            &[("user", "gordon")],
        );
        // More captured groups outrank the partially literal sibling.
        check(
            &matcher,
            "/info/gordon/project/golang",
            "/info/:user/project/:project",
            &[("user", "gordon"), ("project", "golang")],
        );
    }

    #[test]
    fn test_empty_trailing_capture_is_not_a_match() {
        let matcher = PathMatcher::build(&["/src/*filepath"]);
        assert!(matcher.find("/src/").is_none());
    }

    #[test]
    fn test_group_count_then_length() {
        let matcher = PathMatcher::build(&["/a/:x", "/a/:x/:y"]);
        check(&matcher, "/a/1/2", "/a/:x/:y", &[("x", "1"), ("y", "2")]);

        let matcher = PathMatcher::build(&["/v/:id", "/v/:id/edit"]);
        check(&matcher, "/v/7/edit", "/v/:id/edit", &[("id", "7")]);
    }

    #[test]
    fn test_exact_beats_everything() {
        let matcher = PathMatcher::build(&["~ /api/*rest", "/api/:a/:b", "= /api/v1/test"]);
        check(&matcher, "/api/v1/test", "/api/v1/test", &[]);
    }

    #[test]
    fn test_prefix_bucket_checked_before_generic() {
        let matcher = PathMatcher::build(&["/static/:a/:b", "~ /static/*file"]);
        check(
            &matcher,
            "/static/css/site.css",
            "/static/*file",
            &[("file", "css/site.css")],
        );
    }

    #[test]
    fn test_params_accessors() {
        let p = params(&[("tool", "test"), ("sub", "3")]);
        assert_eq!(p.get("sub"), Some("3"));
        assert_eq!(p.by_name("missing"), "");
        assert_eq!(p.values(), vec!["test", "3"]);
    }
}
