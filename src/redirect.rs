//! Redirect table loading, rule matching, and request routing.
//!
//! ## Table Format
//!
//! One rule per line, whitespace separated, `#` starts a comment:
//!
//! ```text
//! # legacy Jekyll permalinks
//! /2019/04/01/hello-world.html   /blog/hello-world          301
//! /assets/img/:filename          /img/:filename             301
//! /tag/:name                     /blog/tags/:name           308
//! /old-feed/*                    https://example.dev/:splat 302
//! ```
//!
//! The status is optional and defaults to 301.
//!
//! ## Patterns
//!
//! - `:name` matches exactly one non-empty path segment
//! - a trailing `*` matches the rest of the path (possibly empty), bound as `:splat`
//! - everything else matches literally, case-sensitively
//!
//! Trailing slashes are ignored on both sides (`/a/` and `/a` are the same
//! path) and query strings are carried over to the redirect location.
//!
//! ## Validation
//!
//! The table is checked as a whole when loaded, and any failure rejects it:
//! duplicate source paths, a rule pointing at itself, unsupported status
//! codes, and placeholders that appear on only one side of a rule.
//!
//! ## Routing
//!
//! [`Router::resolve`] evaluates rules in declaration order; the first match
//! wins. Unmatched paths fall through to a [`ContentLookup`], then to
//! [`Resolution::NotFound`].

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_STATUS: u16 = 301;
pub const ALLOWED_STATUSES: &[u16] = &[301, 302, 303, 307, 308];
const SPLAT: &str = "splat";

#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected `<source> <destination> [status]`, got `{text}`")]
    Malformed { line: usize, text: String },
    #[error("line {line}: unsupported status `{status}` (allowed: 301, 302, 303, 307, 308)")]
    Status { line: usize, status: String },
    #[error("line {line}: source `{pattern}` must start with `/`")]
    RelativeSource { line: usize, pattern: String },
    #[error("line {line}: `{pattern}` redirects to itself")]
    SelfRedirect { line: usize, pattern: String },
    #[error("line {line}: `*` must be the last segment of `{pattern}`")]
    SplatNotLast { line: usize, pattern: String },
    #[error("line {line}: placeholder `:{name}` appears more than once in the source")]
    RepeatedPlaceholder { line: usize, name: String },
    #[error("line {line}: source placeholder `:{name}` is not used in the destination")]
    UnusedPlaceholder { line: usize, name: String },
    #[error("line {line}: destination placeholder `:{name}` is not bound by the source")]
    UnboundPlaceholder { line: usize, name: String },
    #[error("line {line}: source `{pattern}` is already claimed on line {first_line}")]
    Duplicate {
        line: usize,
        first_line: usize,
        pattern: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Splat,
}

/// A single `source → destination` rule.
#[derive(Debug, Clone, Serialize)]
pub struct RedirectRule {
    /// Source pattern, normalized (no trailing slash).
    pub source: String,
    /// Destination pattern: a site path or an absolute URL.
    pub destination: String,
    pub status: u16,
    /// 1-based line in the table file, for error messages.
    pub line: usize,
    #[serde(skip)]
    pattern: Vec<Segment>,
}

/// A matched redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    pub status: u16,
}

impl RedirectRule {
    /// Build and validate a rule.
    pub fn new(
        source: &str,
        destination: &str,
        status: u16,
        line: usize,
    ) -> Result<Self, RedirectError> {
        if !source.starts_with('/') {
            return Err(RedirectError::RelativeSource {
                line,
                pattern: source.to_string(),
            });
        }
        if !ALLOWED_STATUSES.contains(&status) {
            return Err(RedirectError::Status {
                line,
                status: status.to_string(),
            });
        }

        let source = normalize_path(source);
        let destination = normalize_destination(destination);
        if source == destination {
            return Err(RedirectError::SelfRedirect {
                line,
                pattern: source,
            });
        }

        let pattern = parse_pattern(&source, line)?;
        let bound: BTreeSet<&str> = pattern
            .iter()
            .filter_map(|seg| match seg {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Splat => Some(SPLAT),
                Segment::Literal(_) => None,
            })
            .collect();
        let used: BTreeSet<String> = placeholders(&destination).into_iter().collect();

        if let Some(name) = bound.iter().find(|name| !used.contains(**name)) {
            return Err(RedirectError::UnusedPlaceholder {
                line,
                name: name.to_string(),
            });
        }
        if let Some(name) = used.iter().find(|name| !bound.contains(name.as_str())) {
            return Err(RedirectError::UnboundPlaceholder {
                line,
                name: name.clone(),
            });
        }

        Ok(Self {
            source,
            destination,
            status,
            line,
            pattern,
        })
    }

    /// True when the source has no placeholders or splat.
    pub fn is_literal(&self) -> bool {
        self.pattern
            .iter()
            .all(|seg| matches!(seg, Segment::Literal(_)))
    }

    /// Apply the rule to a request path (query string already removed).
    pub fn apply(&self, path: &str) -> Option<Redirect> {
        let normalized = normalize_path(path);
        let segments = split_segments(&normalized);
        let bindings = match_pattern(&self.pattern, &segments)?;
        Some(Redirect {
            location: substitute(&self.destination, &bindings),
            status: self.status,
        })
    }

    /// The rule as a table line.
    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.source, self.destination, self.status)
    }
}

fn parse_pattern(source: &str, line: usize) -> Result<Vec<Segment>, RedirectError> {
    let raw = split_segments(source);
    let mut seen = BTreeSet::new();
    let mut pattern = Vec::with_capacity(raw.len());
    for (i, seg) in raw.iter().enumerate() {
        let segment = if *seg == "*" {
            if i + 1 != raw.len() {
                return Err(RedirectError::SplatNotLast {
                    line,
                    pattern: source.to_string(),
                });
            }
            Segment::Splat
        } else if let Some(name) = seg.strip_prefix(':').filter(|n| is_identifier(n)) {
            Segment::Param(name.to_string())
        } else {
            Segment::Literal(seg.to_string())
        };
        let name = match &segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Splat => Some(SPLAT),
            Segment::Literal(_) => None,
        };
        if let Some(name) = name
            && !seen.insert(name.to_string())
        {
            return Err(RedirectError::RepeatedPlaceholder {
                line,
                name: name.to_string(),
            });
        }
        pattern.push(segment);
    }
    Ok(pattern)
}

fn match_pattern<'a>(pattern: &[Segment], segments: &[&'a str]) -> Option<HashMap<String, String>> {
    let mut bindings = HashMap::new();
    for (i, seg) in pattern.iter().enumerate() {
        match seg {
            Segment::Splat => {
                bindings.insert(SPLAT.to_string(), segments.get(i..)?.join("/"));
                return Some(bindings);
            }
            Segment::Literal(lit) => {
                if segments.get(i) != Some(&lit.as_str()) {
                    return None;
                }
            }
            Segment::Param(name) => {
                let value = segments.get(i).filter(|v| !v.is_empty())?;
                bindings.insert(name.clone(), value.to_string());
            }
        }
    }
    (segments.len() == pattern.len()).then_some(bindings)
}

/// Replace every `:name` token in `template` with its binding.
fn substitute(template: &str, bindings: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(':') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = identifier_len(after);
        match bindings.get(&after[..len]) {
            Some(value) if len > 0 => out.push_str(value),
            _ => {
                out.push(':');
                out.push_str(&after[..len]);
            }
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}

/// Placeholder names used in a destination (`:name` tokens).
fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find(':') {
        let after = &rest[pos + 1..];
        let len = identifier_len(after);
        if len > 0 {
            names.push(after[..len].to_string());
        }
        rest = &after[len..];
    }
    names
}

/// Length of the identifier at the start of `s`. Identifiers start with a
/// letter or underscore, so `host:8080` and `https://` are not placeholders.
fn identifier_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return 0,
    }
    chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && identifier_len(s) == s.len()
}

/// Strip query/fragment and trailing slashes; the root stays `/`.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Site-relative destinations drop trailing slashes on the path part but
/// keep any query or fragment. Absolute URLs are left as written.
fn normalize_destination(destination: &str) -> String {
    if !destination.starts_with('/') {
        return destination.to_string();
    }
    let split = destination.find(['?', '#']).unwrap_or(destination.len());
    let (path, suffix) = destination.split_at(split);
    format!("{}{suffix}", normalize_path(path))
}

fn split_segments(normalized: &str) -> Vec<&str> {
    match normalized.strip_prefix('/') {
        Some("") | None => Vec::new(),
        Some(rest) => rest.split('/').collect(),
    }
}

// ============================================================================
// Table
// ============================================================================

/// Ordered, validated set of redirect rules.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RedirectTable {
    pub rules: Vec<RedirectRule>,
}

impl RedirectTable {
    /// Parse a table from text.
    pub fn parse(text: &str) -> Result<Self, RedirectError> {
        let mut rules: Vec<RedirectRule> = Vec::new();
        let mut claimed: HashMap<String, usize> = HashMap::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line = idx + 1;
            let content = strip_comment(raw_line).trim();
            if content.is_empty() {
                continue;
            }
            let fields: Vec<&str> = content.split_whitespace().collect();
            let (source, destination, status) = match fields.as_slice() {
                [source, destination] => (*source, *destination, DEFAULT_STATUS),
                [source, destination, status] => {
                    let status = status.parse::<u16>().map_err(|_| RedirectError::Status {
                        line,
                        status: status.to_string(),
                    })?;
                    (*source, *destination, status)
                }
                _ => {
                    return Err(RedirectError::Malformed {
                        line,
                        text: content.to_string(),
                    });
                }
            };

            let rule = RedirectRule::new(source, destination, status, line)?;
            if let Some(&first_line) = claimed.get(&rule.source) {
                return Err(RedirectError::Duplicate {
                    line,
                    first_line,
                    pattern: rule.source,
                });
            }
            claimed.insert(rule.source.clone(), line);
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    /// Load the table at `path`. A missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self, RedirectError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// First matching rule wins. Query strings are re-appended to the location.
    pub fn lookup(&self, request: &str) -> Option<Redirect> {
        let (path, query) = match request.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request, None),
        };
        let mut redirect = self.rules.iter().find_map(|rule| rule.apply(path))?;
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            let sep = if redirect.location.contains('?') { '&' } else { '?' };
            redirect.location = format!("{}{sep}{query}", redirect.location);
        }
        Some(redirect)
    }

    /// Serialize back to the table format, one normalized rule per line.
    pub fn to_table_text(&self) -> String {
        let mut text = String::new();
        for rule in &self.rules {
            text.push_str(&rule.to_line());
            text.push('\n');
        }
        text
    }
}

/// Drop a `#` comment. A `#` only opens a comment at the start of a line or
/// after whitespace, so destinations may carry fragments.
fn strip_comment(line: &str) -> &str {
    let mut prev_space = true;
    for (idx, c) in line.char_indices() {
        if c == '#' && prev_space {
            return &line[..idx];
        }
        prev_space = c.is_whitespace();
    }
    line
}

// ============================================================================
// Routing
// ============================================================================

/// Outcome of routing a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Redirect { location: String, status: u16 },
    Content(PathBuf),
    NotFound,
}

/// Resolves a request path to a servable file.
pub trait ContentLookup {
    fn lookup(&self, path: &str) -> Option<PathBuf>;
}

/// Content lookup against a built site directory.
///
/// Tries the exact file, then `<path>/index.html`, then `<path>.html`.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContentLookup for OutputDir {
    fn lookup(&self, path: &str) -> Option<PathBuf> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let relative = Path::new(path.trim_start_matches('/'));
        // Refuse anything that could step outside the root.
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let base = self.root.join(relative);
        let candidates = [
            base.clone(),
            base.join("index.html"),
            base.with_extension("html"),
        ];
        candidates.into_iter().find(|p| p.is_file())
    }
}

/// Routes request paths: redirects first, then content, then not-found.
pub struct Router<'a, C> {
    table: &'a RedirectTable,
    content: C,
}

impl<'a, C: ContentLookup> Router<'a, C> {
    pub fn new(table: &'a RedirectTable, content: C) -> Self {
        Self { table, content }
    }

    pub fn resolve(&self, request: &str) -> Resolution {
        if let Some(redirect) = self.table.lookup(request) {
            return Resolution::Redirect {
                location: redirect.location,
                status: redirect.status,
            };
        }
        match self.content.lookup(request) {
            Some(path) => Resolution::Content(path),
            None => Resolution::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rule(source: &str, destination: &str, status: u16) -> RedirectRule {
        RedirectRule::new(source, destination, status, 1).unwrap()
    }

    // =========================================================================
    // Rule matching
    // =========================================================================

    #[test]
    fn placeholder_rule_rewrites_filename() {
        let r = rule("/assets/img/:filename", "/img/:filename", 301);
        assert_eq!(
            r.apply("/assets/img/logo.png"),
            Some(Redirect {
                location: "/img/logo.png".to_string(),
                status: 301
            })
        );
    }

    #[test]
    fn literal_source_yields_destination() {
        let rules = [
            rule("/2019/04/01/hello.html", "/blog/hello", 301),
            rule("/assets/img/:filename", "/img/:filename", 308),
            rule("/tag/:name/page/:n", "/blog/tags/:name?page=:n", 302),
        ];
        for r in &rules {
            let redirect = r.apply(&r.source).unwrap();
            assert_eq!(redirect.location, r.destination);
            assert_eq!(redirect.status, r.status);
        }
    }

    #[test]
    fn placeholder_needs_non_empty_segment() {
        let r = rule("/tag/:name", "/blog/tags/:name", 301);
        assert!(r.apply("/tag").is_none());
        assert!(r.apply("/tag/rust/extra").is_none());
    }

    #[test]
    fn splat_matches_rest_of_path() {
        let r = rule("/old-feed/*", "https://example.dev/:splat", 302);
        assert_eq!(
            r.apply("/old-feed/a/b.xml").unwrap().location,
            "https://example.dev/a/b.xml"
        );
        assert_eq!(r.apply("/old-feed").unwrap().location, "https://example.dev/");
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let r = rule("/about/", "/blog/about", 301);
        assert_eq!(r.source, "/about");
        assert!(r.apply("/about/").is_some());
        assert!(r.apply("/about").is_some());
    }

    #[test]
    fn literal_match_is_case_sensitive() {
        let r = rule("/About", "/about", 301);
        assert!(r.apply("/about").is_none());
    }

    #[test]
    fn port_in_destination_is_not_a_placeholder() {
        let r = rule("/dev", "http://localhost:8080/", 302);
        assert_eq!(r.apply("/dev").unwrap().location, "http://localhost:8080/");
    }

    // =========================================================================
    // Rule validation
    // =========================================================================

    #[test]
    fn self_redirect_rejected() {
        let err = RedirectRule::new("/a/", "/a", 301, 3).unwrap_err();
        assert!(matches!(err, RedirectError::SelfRedirect { line: 3, .. }));
    }

    #[test]
    fn unused_source_placeholder_rejected() {
        let err = RedirectRule::new("/img/:file", "/images/", 301, 1).unwrap_err();
        assert!(matches!(err, RedirectError::UnusedPlaceholder { ref name, .. } if name == "file"));
    }

    #[test]
    fn unbound_destination_placeholder_rejected() {
        let err = RedirectRule::new("/img/:file", "/images/:file/:size", 301, 1).unwrap_err();
        assert!(matches!(err, RedirectError::UnboundPlaceholder { ref name, .. } if name == "size"));
    }

    #[test]
    fn splat_must_be_last() {
        let err = RedirectRule::new("/a/*/b", "/c/:splat", 301, 1).unwrap_err();
        assert!(matches!(err, RedirectError::SplatNotLast { .. }));
    }

    #[test]
    fn repeated_placeholder_rejected() {
        let err = RedirectRule::new("/:x/:x", "/y/:x", 301, 1).unwrap_err();
        assert!(matches!(err, RedirectError::RepeatedPlaceholder { .. }));
    }

    #[test]
    fn unsupported_status_rejected() {
        assert!(matches!(
            RedirectRule::new("/a", "/b", 200, 1),
            Err(RedirectError::Status { .. })
        ));
    }

    #[test]
    fn relative_source_rejected() {
        assert!(matches!(
            RedirectRule::new("a", "/b", 301, 1),
            Err(RedirectError::RelativeSource { .. })
        ));
    }

    // =========================================================================
    // Table parsing
    // =========================================================================

    #[test]
    fn parse_table_with_comments_and_default_status() {
        let table = RedirectTable::parse(
            "# legacy\n\n/old /new\n/assets/img/:filename /img/:filename 301 # images\n",
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rules[0].status, DEFAULT_STATUS);
        assert_eq!(table.rules[0].line, 3);
        assert_eq!(table.rules[1].line, 4);
    }

    #[test]
    fn fragment_in_destination_is_not_a_comment() {
        let table = RedirectTable::parse("/faq /blog/help#faq 302\n").unwrap();
        assert_eq!(table.rules[0].destination, "/blog/help#faq");
        assert_eq!(table.rules[0].status, 302);
    }

    #[test]
    fn duplicate_source_rejected_at_load() {
        let err = RedirectTable::parse("/old /a 301\n/old/ /b 302\n").unwrap_err();
        assert!(matches!(
            err,
            RedirectError::Duplicate {
                line: 2,
                first_line: 1,
                ..
            }
        ));
    }

    #[test]
    fn malformed_line_rejected() {
        let err = RedirectTable::parse("/only-one-field\n").unwrap_err();
        assert!(matches!(err, RedirectError::Malformed { line: 1, .. }));
        assert!(RedirectTable::parse("/a /b 301 extra\n").is_err());
    }

    #[test]
    fn non_numeric_status_rejected() {
        assert!(matches!(
            RedirectTable::parse("/a /b permanent\n"),
            Err(RedirectError::Status { line: 1, .. })
        ));
    }

    #[test]
    fn first_match_wins() {
        let table = RedirectTable::parse("/docs/intro /first 301\n/docs/:page /second/:page 302\n")
            .unwrap();
        assert_eq!(table.lookup("/docs/intro").unwrap().location, "/first");
        assert_eq!(table.lookup("/docs/other").unwrap().location, "/second/other");
    }

    #[test]
    fn lookup_carries_query_string() {
        let table = RedirectTable::parse("/search /find 302\n/q /find?src=old 302\n").unwrap();
        assert_eq!(table.lookup("/search?q=rust").unwrap().location, "/find?q=rust");
        assert_eq!(
            table.lookup("/q?x=1").unwrap().location,
            "/find?src=old&x=1"
        );
    }

    #[test]
    fn table_text_round_trips() {
        let table = RedirectTable::parse("/a/ /b\n/c/:x /d/:x 308\n").unwrap();
        let text = table.to_table_text();
        assert_eq!(text, "/a /b 301\n/c/:x /d/:x 308\n");
        assert_eq!(RedirectTable::parse(&text).unwrap().len(), 2);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let table = RedirectTable::load(&tmp.path().join("_redirects")).unwrap();
        assert!(table.is_empty());
    }

    // =========================================================================
    // Router
    // =========================================================================

    fn site() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("blog/hello")).unwrap();
        fs::write(tmp.path().join("blog/hello/index.html"), "hello").unwrap();
        fs::write(tmp.path().join("index.html"), "home").unwrap();
        fs::write(tmp.path().join("about.html"), "about").unwrap();
        tmp
    }

    #[test]
    fn router_prefers_redirects() {
        let tmp = site();
        let table = RedirectTable::parse("/blog/hello /blog/goodbye 307\n").unwrap();
        let router = Router::new(&table, OutputDir::new(tmp.path()));
        assert_eq!(
            router.resolve("/blog/hello/"),
            Resolution::Redirect {
                location: "/blog/goodbye".to_string(),
                status: 307
            }
        );
    }

    #[test]
    fn router_falls_through_to_content() {
        let tmp = site();
        let table = RedirectTable::default();
        let router = Router::new(&table, OutputDir::new(tmp.path()));
        assert_eq!(
            router.resolve("/blog/hello/"),
            Resolution::Content(tmp.path().join("blog/hello/index.html"))
        );
        assert_eq!(
            router.resolve("/"),
            Resolution::Content(tmp.path().join("index.html"))
        );
        assert_eq!(
            router.resolve("/about"),
            Resolution::Content(tmp.path().join("about.html"))
        );
    }

    #[test]
    fn router_not_found() {
        let tmp = site();
        let table = RedirectTable::default();
        let router = Router::new(&table, OutputDir::new(tmp.path()));
        assert_eq!(router.resolve("/missing"), Resolution::NotFound);
    }

    #[test]
    fn router_refuses_parent_traversal() {
        let tmp = site();
        let inner = tmp.path().join("blog");
        let table = RedirectTable::default();
        let router = Router::new(&table, OutputDir::new(&inner));
        assert_eq!(router.resolve("/../index.html"), Resolution::NotFound);
    }
}
