//! Front-matter extraction and parsing.
//!
//! A document may open with a metadata block in one of two fences:
//!
//! ```text
//! ---                          +++
//! title: Moving house          title = "Moving house"
//! tags: [meta, hosting]        tags = ["meta", "hosting"]
//! ---                          +++
//! ```
//!
//! `---` blocks are YAML, `+++` blocks are TOML. A document without a block
//! has empty front-matter, which fails the required-field check unless the
//! document is a draft.
//!
//! Fields other than the ones below are accepted and ignored, so posts
//! migrated from other generators (with `authors`, `image`, `keywords`, ...)
//! parse unchanged.

use crate::naming::sanitize_slug;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontMatterError {
    #[error("front-matter opened with `{0}` is never closed")]
    Unterminated(&'static str),
    #[error("YAML front-matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML front-matter: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid date `{0}` (expected YYYY-MM-DD or RFC 3339)")]
    InvalidDate(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("tag `{0}` has no URL-safe characters")]
    UnusableTag(String),
}

/// Parsed, normalized front-matter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub category: Option<String>,
    /// Overrides the filename-derived slug.
    pub slug: Option<String>,
    /// Overrides the filename date prefix and the file mtime.
    pub date: Option<DateTime<Utc>>,
    pub draft: bool,
}

impl FrontMatter {
    /// Check the fields every published document must carry: a non-empty
    /// title, a non-empty description, and at least one tag. Every tag must
    /// yield a non-empty slug so it can get a tag page.
    pub fn check_required(&self) -> Result<(), FrontMatterError> {
        if is_blank(self.title.as_deref()) {
            return Err(FrontMatterError::MissingField("title"));
        }
        if is_blank(self.description.as_deref()) {
            return Err(FrontMatterError::MissingField("description"));
        }
        if self.tags.is_empty() {
            return Err(FrontMatterError::MissingField("tags"));
        }
        if let Some(tag) = self.tags.iter().find(|t| sanitize_slug(t).is_empty()) {
            return Err(FrontMatterError::UnusableTag(tag.clone()));
        }
        Ok(())
    }

    /// Title for display, empty when absent.
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    /// Description for display, empty when absent.
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::trim).is_none_or(str::is_empty)
}

/// Fence style of a front-matter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fence {
    Yaml,
    Toml,
}

impl Fence {
    fn delimiter(self) -> &'static str {
        match self {
            Fence::Yaml => "---",
            Fence::Toml => "+++",
        }
    }
}

/// Split a source file into its front-matter block and body.
///
/// Returns `(None, source)` when the file does not open with a fence. The
/// body starts on the line after the closing fence.
pub fn split(source: &str) -> Result<(Option<(Fence, &str)>, &str), FrontMatterError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let fence = match first_line(source) {
        "---" => Fence::Yaml,
        "+++" => Fence::Toml,
        _ => return Ok((None, source)),
    };
    let delimiter = fence.delimiter();

    let block_start = line_end(source, 0);
    let mut pos = block_start;
    while pos < source.len() {
        let next = line_end(source, pos);
        let line = source[pos..next].trim_end_matches(['\n', '\r']);
        if line.trim_end() == delimiter {
            return Ok((Some((fence, &source[block_start..pos])), &source[next..]));
        }
        pos = next;
    }
    Err(FrontMatterError::Unterminated(delimiter))
}

fn first_line(source: &str) -> &str {
    source
        .lines()
        .next()
        .map(str::trim_end)
        .unwrap_or_default()
}

/// Byte offset just past the newline ending the line that starts at `from`.
fn line_end(source: &str, from: usize) -> usize {
    source[from..]
        .find('\n')
        .map(|i| from + i + 1)
        .unwrap_or(source.len())
}

/// Raw field shapes as authors write them.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFrontMatter {
    title: Option<String>,
    description: Option<String>,
    tags: Option<TagsField>,
    category: Option<String>,
    slug: Option<String>,
    date: Option<String>,
    draft: bool,
}

/// `tags: [a, b]` or `tags: "a, b"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagsField {
    List(Vec<String>),
    Csv(String),
}

impl TagsField {
    fn into_set(self) -> BTreeSet<String> {
        let items: Vec<String> = match self {
            TagsField::List(list) => list,
            TagsField::Csv(csv) => csv.split(',').map(String::from).collect(),
        };
        items
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Parse a whole source file, returning its front-matter and body.
pub fn parse(source: &str) -> Result<(FrontMatter, &str), FrontMatterError> {
    let (block, body) = split(source)?;
    let raw = match block {
        None => RawFrontMatter::default(),
        Some((_, text)) if text.trim().is_empty() => RawFrontMatter::default(),
        Some((Fence::Yaml, text)) => serde_yaml::from_str(text)?,
        Some((Fence::Toml, text)) => parse_toml_block(text)?,
    };
    Ok((normalize(raw)?, body))
}

/// TOML dates are native datetime values; turn them into strings so both
/// fences share one date parser.
fn parse_toml_block(text: &str) -> Result<RawFrontMatter, FrontMatterError> {
    let mut value: toml::Value = toml::from_str(text)?;
    if let Some(table) = value.as_table_mut()
        && let Some(toml::Value::Datetime(dt)) = table.get("date")
    {
        let as_string = dt.to_string();
        table.insert("date".to_string(), toml::Value::String(as_string));
    }
    Ok(value.try_into()?)
}

fn normalize(raw: RawFrontMatter) -> Result<FrontMatter, FrontMatterError> {
    let date = raw.date.as_deref().map(parse_date).transpose()?;
    Ok(FrontMatter {
        title: raw.title.map(|t| t.trim().to_string()),
        description: raw.description.map(|d| d.trim().to_string()),
        tags: raw.tags.map(TagsField::into_set).unwrap_or_default(),
        category: raw
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        slug: raw
            .slug
            .map(|s| s.trim().trim_matches('/').to_string())
            .filter(|s| !s.is_empty()),
        date,
        draft: raw.draft,
    })
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, FrontMatterError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| FrontMatterError::InvalidDate(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    // =========================================================================
    // split
    // =========================================================================

    #[test]
    fn split_yaml_block() {
        let src = "---\ntitle: Hi\n---\nBody\n";
        let (block, body) = split(src).unwrap();
        assert_eq!(block, Some((Fence::Yaml, "title: Hi\n")));
        assert_eq!(body, "Body\n");
    }

    #[test]
    fn split_toml_block_with_crlf() {
        let src = "+++\r\ntitle = \"Hi\"\r\n+++\r\nBody";
        let (block, body) = split(src).unwrap();
        assert_eq!(block.map(|(f, _)| f), Some(Fence::Toml));
        assert_eq!(body, "Body");
    }

    #[test]
    fn split_without_block_returns_source() {
        let (block, body) = split("# Heading\n\ntext").unwrap();
        assert!(block.is_none());
        assert_eq!(body, "# Heading\n\ntext");
    }

    #[test]
    fn split_unterminated_is_error() {
        let err = split("---\ntitle: Hi\nno close\n").unwrap_err();
        assert!(matches!(err, FrontMatterError::Unterminated("---")));
    }

    #[test]
    fn split_ignores_dashes_inside_body() {
        let src = "---\ntitle: Hi\n---\nabove\n---\nbelow\n";
        let (_, body) = split(src).unwrap();
        assert_eq!(body, "above\n---\nbelow\n");
    }

    #[test]
    fn split_strips_byte_order_mark() {
        let (block, _) = split("\u{feff}---\ntitle: Hi\n---\n").unwrap();
        assert!(block.is_some());
    }

    // =========================================================================
    // parse
    // =========================================================================

    #[test]
    fn parse_yaml_fields() {
        let src = "---\ntitle: Moving house\ndescription: Jekyll to Docusaurus\ntags: [meta, hosting]\ncategory: blog\ndate: 2021-03-14\n---\nBody";
        let (fm, body) = parse(src).unwrap();
        assert_eq!(fm.title(), "Moving house");
        assert_eq!(fm.description(), "Jekyll to Docusaurus");
        assert_eq!(
            fm.tags.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["hosting", "meta"]
        );
        assert_eq!(fm.category.as_deref(), Some("blog"));
        assert_eq!(fm.date.unwrap().year(), 2021);
        assert_eq!(body, "Body");
    }

    #[test]
    fn parse_comma_separated_tags() {
        let (fm, _) = parse("---\ntags: \"ci, timeouts , ,http\"\n---\n").unwrap();
        assert_eq!(fm.tags.len(), 3);
        assert!(fm.tags.contains("timeouts"));
    }

    #[test]
    fn parse_toml_native_date() {
        let src = "+++\ntitle = \"T\"\ndate = 2022-01-02\ntags = [\"a\"]\n+++\n";
        let (fm, _) = parse(src).unwrap();
        let date = fm.date.unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2022, 1, 2));
    }

    #[test]
    fn parse_rfc3339_date() {
        let (fm, _) = parse("---\ndate: \"2023-05-06T10:30:00+02:00\"\n---\n").unwrap();
        assert_eq!(fm.date.unwrap().to_rfc3339(), "2023-05-06T08:30:00+00:00");
    }

    #[test]
    fn parse_invalid_date_is_error() {
        let err = parse("---\ndate: last tuesday\n---\n").unwrap_err();
        assert!(matches!(err, FrontMatterError::InvalidDate(_)));
    }

    #[test]
    fn parse_tolerates_unknown_fields() {
        let (fm, _) = parse("---\ntitle: T\nauthors: [me]\nhide_table_of_contents: true\n---\n").unwrap();
        assert_eq!(fm.title(), "T");
    }

    #[test]
    fn parse_empty_block() {
        let (fm, body) = parse("---\n---\ntext").unwrap();
        assert_eq!(fm, FrontMatter::default());
        assert_eq!(body, "text");
    }

    #[test]
    fn parse_malformed_yaml_is_error() {
        assert!(matches!(
            parse("---\ntitle: [unclosed\n---\n"),
            Err(FrontMatterError::Yaml(_))
        ));
    }

    #[test]
    fn parse_slug_override_strips_slashes() {
        let (fm, _) = parse("---\nslug: /timeouts/\n---\n").unwrap();
        assert_eq!(fm.slug.as_deref(), Some("timeouts"));
    }

    // =========================================================================
    // check_required
    // =========================================================================

    #[test]
    fn required_fields_pass() {
        let (fm, _) = parse("---\ntitle: T\ndescription: D\ntags: [x]\n---\n").unwrap();
        assert!(fm.check_required().is_ok());
    }

    #[test]
    fn missing_title_rejected() {
        let (fm, _) = parse("---\ntitle: \"  \"\ndescription: D\ntags: [x]\n---\n").unwrap();
        assert!(matches!(
            fm.check_required(),
            Err(FrontMatterError::MissingField("title"))
        ));
    }

    #[test]
    fn missing_tags_rejected() {
        let (fm, _) = parse("---\ntitle: T\ndescription: D\ntags: []\n---\n").unwrap();
        assert!(matches!(
            fm.check_required(),
            Err(FrontMatterError::MissingField("tags"))
        ));
    }

    #[test]
    fn tag_without_slug_rejected() {
        let (fm, _) =
            parse("---\ntitle: T\ndescription: D\ntags: [rust, \"!!!\"]\n---\n").unwrap();
        assert!(matches!(
            fm.check_required(),
            Err(FrontMatterError::UnusableTag(ref tag)) if tag == "!!!"
        ));
    }

    #[test]
    fn emoji_only_tag_rejected() {
        let source = "+++\ntitle = \"T\"\ndescription = \"D\"\ntags = [\"\u{1F680}\"]\n+++\n";
        let (fm, _) = parse(source).unwrap();
        assert!(matches!(
            fm.check_required(),
            Err(FrontMatterError::UnusableTag(_))
        ));
    }
}
