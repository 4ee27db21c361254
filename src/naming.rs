//! Filename parsing for the `YYYY-MM-DD-name` post convention, and slug
//! sanitization shared by posts and tags.
//!
//! Posts migrated from date-prefixed generators keep their filenames:
//! - `2021-03-14-moving-to-docusaurus.md` → date 2021-03-14, name `moving-to-docusaurus`
//! - `2021-03-14-moving-to-docusaurus/index.md` → same, via the directory name
//! - `timeouts.md` → no date, name `timeouts`
//!
//! The name part becomes the default slug; front-matter can override both.

use chrono::NaiveDate;

/// Result of parsing a post stem like `2021-03-14-moving-to-docusaurus`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName {
    /// Date prefix if present and a valid calendar date.
    pub date: Option<NaiveDate>,
    /// Remainder after the date prefix, dashes preserved. For undated
    /// entries this is the full input.
    pub name: String,
}

const DATE_PREFIX_LEN: usize = "YYYY-MM-DD".len();

/// Parse a file or directory stem following the `YYYY-MM-DD-name` convention.
///
/// - `"2021-03-14-hello-world"` → date=Some(2021-03-14), name="hello-world"
/// - `"2021-03-14"` → date=Some(2021-03-14), name=""
/// - `"2021-13-40-bad-date"` → date=None, name="2021-13-40-bad-date"
/// - `"hello-world"` → date=None, name="hello-world"
pub fn parse_entry_name(stem: &str) -> ParsedName {
    if stem.len() >= DATE_PREFIX_LEN
        && stem.is_char_boundary(DATE_PREFIX_LEN)
        && let Ok(date) = NaiveDate::parse_from_str(&stem[..DATE_PREFIX_LEN], "%Y-%m-%d")
    {
        let rest = &stem[DATE_PREFIX_LEN..];
        if rest.is_empty() {
            return ParsedName {
                date: Some(date),
                name: String::new(),
            };
        }
        if let Some(name) = rest.strip_prefix('-') {
            return ParsedName {
                date: Some(date),
                name: name.to_string(),
            };
        }
    }
    ParsedName {
        date: None,
        name: stem.to_string(),
    }
}

const MAX_SLUG_LEN: usize = 80;

/// Sanitize a string for use as a URL path segment.
///
/// - Lowercases ASCII letters
/// - Replaces anything that is not alphanumeric or a dash with a dash
/// - Collapses consecutive dashes and strips them from both ends
/// - Truncates to `MAX_SLUG_LEN`, breaking at the last dash before the limit
pub fn sanitize_slug(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut prev_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }

    let trimmed = slug.trim_matches('-');
    if trimmed.len() <= MAX_SLUG_LEN {
        return trimmed.to_string();
    }
    let truncated = &trimmed[..MAX_SLUG_LEN];
    match truncated.rfind('-') {
        Some(pos) => truncated[..pos].to_string(),
        None => truncated.to_string(),
    }
}
