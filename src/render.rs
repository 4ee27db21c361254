//! Markdown rendering, truncation-marker previews, and reference checking.
//!
//! Stage 2 of the pipeline. Every published document renders twice: once in
//! full for its own page, and once as a preview for listing pages.
//!
//! ## Previews
//!
//! The preview is the body up to (not including) the first truncation marker,
//! byte for byte. Nothing is summarized or rewrapped: whatever the author put
//! above the marker is exactly what the listing shows. The full page renders
//! the body with the marker removed.
//!
//! A document without a marker previews its entire body. Past
//! `index.preview_threshold` characters that yields a [`PreviewWarning`],
//! which strict builds escalate to [`RenderError::UntruncatedPreview`].
//!
//! ## References
//!
//! Image sources, and link targets that carry a file extension, must resolve:
//!
//! - relative references resolve against the document's directory
//! - root-absolute references resolve against published asset URLs
//! - `.md`/`.mdx` links must name another document and are rewritten to its permalink
//! - colocated asset references are rewritten to their published URL
//!
//! External URLs, protocol-relative URLs, fragments, and `mailto:` links are
//! never checked.

use crate::config::SiteConfig;
use crate::scan::Manifest;
use crate::types::{Document, Marker};
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html as md_html};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("{document}: reference `{reference}` does not resolve to a document or asset")]
    BrokenReference { document: String, reference: String },
    #[error(
        "{document}: no truncation marker and body is {length} characters (threshold {threshold})"
    )]
    UntruncatedPreview {
        document: String,
        length: usize,
        threshold: usize,
    },
}

/// A published document without a truncation marker whose body is long
/// enough that its listing preview will be the whole article.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewWarning {
    pub document: String,
    pub length: usize,
    pub threshold: usize,
}

impl PreviewWarning {
    pub fn into_error(self) -> RenderError {
        RenderError::UntruncatedPreview {
            document: self.document,
            length: self.length,
            threshold: self.threshold,
        }
    }
}

/// Rendered HTML for one document.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    /// Id of the source document.
    pub id: String,
    pub page_html: String,
    pub preview_html: String,
    /// Whether the preview stops at a marker.
    pub truncated: bool,
    pub reading_minutes: u32,
}

/// Output of [`render_all`]: pages in manifest order plus preview warnings.
#[derive(Debug, Default)]
pub struct RenderOutput {
    pub documents: Vec<RenderedDocument>,
    pub warnings: Vec<PreviewWarning>,
}

impl RenderOutput {
    pub fn get(&self, id: &str) -> Option<&RenderedDocument> {
        self.documents.iter().find(|d| d.id == id)
    }
}

// ============================================================================
// Markers and previews
// ============================================================================

/// Locate the earliest occurrence of any marker in `body`.
///
/// When two markers start at the same offset the longer one wins, so a
/// marker that is a prefix of another never splits it.
pub fn find_marker<S: AsRef<str>>(body: &str, markers: &[S]) -> Option<Marker> {
    markers
        .iter()
        .map(AsRef::as_ref)
        .filter(|m| !m.is_empty())
        .filter_map(|m| body.find(m).map(|offset| Marker { offset, len: m.len() }))
        .min_by(|a, b| a.offset.cmp(&b.offset).then(b.len.cmp(&a.len)))
}

/// Source of the listing preview: the body strictly before the marker, or the
/// whole body when there is none.
pub fn preview_source(doc: &Document) -> &str {
    match doc.marker {
        Some(marker) => &doc.body[..marker.offset],
        None => &doc.body,
    }
}

/// Source of the full page: the body with the marker removed.
pub fn full_source(doc: &Document) -> Cow<'_, str> {
    match doc.marker {
        Some(marker) => {
            let mut body = String::with_capacity(doc.body.len() - marker.len);
            body.push_str(&doc.body[..marker.offset]);
            body.push_str(&doc.body[marker.offset + marker.len..]);
            Cow::Owned(body)
        }
        None => Cow::Borrowed(&doc.body),
    }
}

/// Warn when a document has no marker and its body exceeds `threshold` characters.
pub fn preview_warning(doc: &Document, threshold: usize) -> Option<PreviewWarning> {
    if doc.marker.is_some() {
        return None;
    }
    let length = doc.body.chars().count();
    (length > threshold).then(|| PreviewWarning {
        document: doc.id.clone(),
        length,
        threshold,
    })
}

const WORDS_PER_MINUTE: usize = 200;

/// Estimated reading time in whole minutes, never less than one.
pub fn reading_minutes(text: &str) -> u32 {
    let words = text.split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}

// ============================================================================
// Reference resolution
// ============================================================================

/// Everything a reference can resolve to, built once per manifest.
#[derive(Debug, Default)]
pub struct LinkIndex {
    /// Content-relative document path → permalink.
    documents: HashMap<String, String>,
    /// Content-relative colocated asset path → published URL.
    colocated: HashMap<String, String>,
    /// Every URL an asset or generated file is published at.
    urls: HashSet<String>,
}

/// Files the generate stage always writes, which links may target.
const GENERATED_FILES: &[&str] = &["/index.html", "/404.html", "/rss.xml"];

impl LinkIndex {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let prefix = &manifest.config.content.route_prefix;
        let documents = manifest
            .published()
            .map(|d| (d.id.clone(), permalink(prefix, &d.slug)))
            .collect();
        let colocated = manifest
            .assets
            .iter()
            .filter(|a| a.kind == crate::types::AssetKind::Colocated)
            .map(|a| (a.path.clone(), a.url.clone()))
            .collect();
        let urls = manifest
            .assets
            .iter()
            .map(|a| a.url.clone())
            .chain(GENERATED_FILES.iter().map(|f| f.to_string()))
            .collect();
        Self {
            documents,
            colocated,
            urls,
        }
    }

    /// Resolve a reference made from `doc`. Returns the URL to emit, which is
    /// the input unchanged when no rewrite applies.
    pub fn resolve<'a>(
        &self,
        doc: &Document,
        reference: &'a str,
        is_image: bool,
    ) -> Result<Cow<'a, str>, RenderError> {
        let broken = || RenderError::BrokenReference {
            document: doc.id.clone(),
            reference: reference.to_string(),
        };

        if is_external(reference) {
            return Ok(Cow::Borrowed(reference));
        }

        let (path, suffix) = split_suffix(reference);
        let ext = extension(path);
        if !is_image && ext.is_none() {
            return Ok(Cow::Borrowed(reference));
        }
        let is_document = matches!(ext.as_deref(), Some("md" | "mdx"));

        if let Some(abs) = path.strip_prefix('/') {
            if is_document {
                let permalink = self.documents.get(abs).ok_or_else(broken)?;
                return Ok(Cow::Owned(format!("{permalink}{suffix}")));
            }
            return if self.urls.contains(path) {
                Ok(Cow::Borrowed(reference))
            } else {
                Err(broken())
            };
        }

        let resolved = join_relative(doc.source_dir(), path).ok_or_else(broken)?;
        let target = if is_document {
            self.documents.get(&resolved)
        } else {
            self.colocated.get(&resolved)
        };
        let url = target.ok_or_else(broken)?;
        Ok(Cow::Owned(format!("{url}{suffix}")))
    }
}

/// URL of a post page.
pub fn permalink(route_prefix: &str, slug: &str) -> String {
    format!("/{route_prefix}/{slug}/")
}

fn is_external(reference: &str) -> bool {
    reference.is_empty()
        || reference.starts_with('#')
        || reference.starts_with("//")
        || reference.starts_with("mailto:")
        || reference.starts_with("tel:")
        || reference.starts_with("data:")
        || has_scheme(reference)
}

/// `scheme:` prefix per RFC 3986: a letter followed by letters, digits, `+`, `-`, `.`.
fn has_scheme(reference: &str) -> bool {
    let Some((scheme, _)) = reference.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Split `path?query#fragment` into the path and the rest.
fn split_suffix(reference: &str) -> (&str, &str) {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    reference.split_at(end)
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Join a relative reference onto a content-relative directory, resolving
/// `.` and `..`. Returns `None` when the path climbs above the content root.
fn join_relative(dir: &str, reference: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    Some(parts.join("/"))
}

// ============================================================================
// Markdown
// ============================================================================

fn markdown_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
}

/// Render markdown to HTML, resolving every link and image through `links`.
pub fn render_markdown(
    source: &str,
    doc: &Document,
    links: &LinkIndex,
) -> Result<String, RenderError> {
    let events = Parser::new_ext(source, markdown_options())
        .map(|event| rewrite_event(event, doc, links))
        .collect::<Result<Vec<_>, _>>()?;

    let mut html = String::with_capacity(source.len() * 3 / 2);
    md_html::push_html(&mut html, events.into_iter());
    Ok(html)
}

fn rewrite_event<'a>(
    event: Event<'a>,
    doc: &Document,
    links: &LinkIndex,
) -> Result<Event<'a>, RenderError> {
    Ok(match event {
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: rewrite_url(dest_url, doc, links, true)?,
            title,
            id,
        }),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: rewrite_url(dest_url, doc, links, false)?,
            title,
            id,
        }),
        other => other,
    })
}

fn rewrite_url<'a>(
    url: CowStr<'a>,
    doc: &Document,
    links: &LinkIndex,
    is_image: bool,
) -> Result<CowStr<'a>, RenderError> {
    match links.resolve(doc, &url, is_image)? {
        Cow::Borrowed(_) => Ok(url),
        Cow::Owned(rewritten) => Ok(CowStr::from(rewritten)),
    }
}

/// Render one document's page and preview.
pub fn render_document(doc: &Document, links: &LinkIndex) -> Result<RenderedDocument, RenderError> {
    let full = full_source(doc);
    let page_html = render_markdown(&full, doc, links)?;
    let preview_html = match doc.marker {
        Some(_) => render_markdown(preview_source(doc), doc, links)?,
        None => page_html.clone(),
    };
    Ok(RenderedDocument {
        id: doc.id.clone(),
        page_html,
        preview_html,
        truncated: doc.marker.is_some(),
        reading_minutes: reading_minutes(&full),
    })
}

/// Render every published document, in manifest order.
///
/// Broken references always fail. Preview warnings fail only when
/// `strict` is set (or `index.strict_previews` is on in config).
pub fn render_all(manifest: &Manifest, strict: bool) -> Result<RenderOutput, RenderError> {
    let config: &SiteConfig = &manifest.config;
    let strict = strict || config.index.strict_previews;
    let links = LinkIndex::from_manifest(manifest);

    let published: Vec<&Document> = manifest.published().collect();
    let documents = published
        .iter()
        .map(|doc| render_document(doc, &links))
        .collect::<Result<Vec<_>, _>>()?;

    let mut warnings = Vec::new();
    for doc in &published {
        if let Some(warning) = preview_warning(doc, config.index.preview_threshold) {
            if strict {
                return Err(warning.into_error());
            }
            tracing::warn!(
                document = %warning.document,
                length = warning.length,
                threshold = warning.threshold,
                "no truncation marker; preview is the full body"
            );
            warnings.push(warning);
        }
    }

    tracing::info!(documents = documents.len(), warnings = warnings.len(), "rendered documents");
    Ok(RenderOutput {
        documents,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontmatter::FrontMatter;
    use crate::types::{Asset, AssetKind};
    use chrono::Utc;

    const MARKERS: &[&str] = &["<!-- truncate -->", "{/* truncate */}"];

    fn doc(id: &str, body: &str) -> Document {
        Document {
            id: id.to_string(),
            slug: "post".to_string(),
            front_matter: FrontMatter::default(),
            body: body.to_string(),
            marker: find_marker(body, MARKERS),
            created: Utc::now(),
            modified: Utc::now(),
        }
    }

    fn links() -> LinkIndex {
        let mut documents = HashMap::new();
        documents.insert("2021-03-14-moving.md".to_string(), "/blog/moving/".to_string());
        documents.insert("series/part-2.md".to_string(), "/blog/part-2/".to_string());
        let assets = [
            Asset {
                kind: AssetKind::Static,
                path: "img/logo.png".into(),
                url: "/img/logo.png".into(),
            },
            Asset {
                kind: AssetKind::Colocated,
                path: "series/chart.png".into(),
                url: "/assets/series/chart.png".into(),
            },
        ];
        LinkIndex {
            documents,
            colocated: assets
                .iter()
                .filter(|a| a.kind == AssetKind::Colocated)
                .map(|a| (a.path.clone(), a.url.clone()))
                .collect(),
            urls: assets.iter().map(|a| a.url.clone()).collect(),
        }
    }

    // =========================================================================
    // Markers and previews
    // =========================================================================

    #[test]
    fn preview_stops_before_marker() {
        let d = doc("a.md", "Intro text\n<!-- truncate -->\nRest of article");
        assert_eq!(preview_source(&d), "Intro text\n");
    }

    #[test]
    fn preview_is_prefix_of_body() {
        let bodies = [
            "one\n{/* truncate */}\ntwo",
            "<!-- truncate -->first thing",
            "no marker at all",
            "a\n<!-- truncate -->\nb\n<!-- truncate -->\nc",
        ];
        for body in bodies {
            let d = doc("a.md", body);
            assert!(d.body.starts_with(preview_source(&d)), "{body:?}");
        }
    }

    #[test]
    fn earliest_marker_wins() {
        let body = "x {/* truncate */} y <!-- truncate --> z";
        let marker = find_marker(body, MARKERS).unwrap();
        assert_eq!(marker.offset, 2);
        assert_eq!(marker.len, "{/* truncate */}".len());
    }

    #[test]
    fn no_marker_previews_whole_body() {
        let d = doc("a.md", "short post");
        assert_eq!(preview_source(&d), "short post");
        assert!(preview_warning(&d, 3000).is_none());
    }

    #[test]
    fn long_body_without_marker_warns() {
        let d = doc("long.md", &"word ".repeat(1000));
        let warning = preview_warning(&d, 3000).unwrap();
        assert_eq!(warning.document, "long.md");
        assert_eq!(warning.length, 5000);
        assert!(matches!(
            warning.into_error(),
            RenderError::UntruncatedPreview { threshold: 3000, .. }
        ));
    }

    #[test]
    fn long_body_with_marker_does_not_warn() {
        let body = format!("intro\n<!-- truncate -->\n{}", "word ".repeat(1000));
        assert!(preview_warning(&doc("a.md", &body), 3000).is_none());
    }

    #[test]
    fn full_source_drops_marker() {
        let d = doc("a.md", "Intro text\n<!-- truncate -->\nRest of article");
        assert_eq!(full_source(&d), "Intro text\n\nRest of article");
    }

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(reading_minutes(""), 1);
        assert_eq!(reading_minutes(&"w ".repeat(200)), 1);
        assert_eq!(reading_minutes(&"w ".repeat(201)), 2);
    }

    // =========================================================================
    // Reference resolution
    // =========================================================================

    #[test]
    fn external_references_pass_through() {
        let d = doc("a.md", "");
        let index = links();
        for r in [
            "https://example.com/x.png",
            "//cdn.example.com/x.js",
            "#heading",
            "mailto:me@example.com",
        ] {
            assert_eq!(index.resolve(&d, r, true).unwrap(), r);
        }
    }

    #[test]
    fn links_without_extension_are_not_checked() {
        let d = doc("a.md", "");
        assert_eq!(links().resolve(&d, "/blog/tags/", false).unwrap(), "/blog/tags/");
    }

    #[test]
    fn static_asset_resolves() {
        let d = doc("a.md", "");
        assert_eq!(links().resolve(&d, "/img/logo.png", true).unwrap(), "/img/logo.png");
    }

    #[test]
    fn missing_static_asset_is_broken() {
        let d = doc("a.md", "");
        let err = links().resolve(&d, "/img/missing.png", true).unwrap_err();
        assert_eq!(
            err,
            RenderError::BrokenReference {
                document: "a.md".into(),
                reference: "/img/missing.png".into(),
            }
        );
    }

    #[test]
    fn colocated_asset_rewritten() {
        let d = doc("series/part-1.md", "");
        assert_eq!(
            links().resolve(&d, "./chart.png", true).unwrap(),
            "/assets/series/chart.png"
        );
    }

    #[test]
    fn document_link_rewritten_to_permalink() {
        let d = doc("series/part-1.md", "");
        let index = links();
        assert_eq!(index.resolve(&d, "part-2.md#setup", false).unwrap(), "/blog/part-2/#setup");
        assert_eq!(
            index.resolve(&d, "../2021-03-14-moving.md", false).unwrap(),
            "/blog/moving/"
        );
    }

    #[test]
    fn link_climbing_above_root_is_broken() {
        let d = doc("a.md", "");
        assert!(links().resolve(&d, "../outside.md", false).is_err());
    }

    #[test]
    fn join_relative_normalizes() {
        assert_eq!(join_relative("a/b", "../c/./d.png").as_deref(), Some("a/c/d.png"));
        assert_eq!(join_relative("", "x.png").as_deref(), Some("x.png"));
        assert_eq!(join_relative("", "../x.png"), None);
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    #[test]
    fn render_rewrites_image_sources() {
        let d = doc("series/part-1.md", "![chart](chart.png)");
        let html = render_markdown(&d.body, &d, &links()).unwrap();
        assert!(html.contains(r#"src="/assets/series/chart.png""#), "{html}");
    }

    #[test]
    fn render_fails_on_broken_image() {
        let d = doc("a.md", "text\n\n![gone](/img/gone.png)");
        assert!(matches!(
            render_markdown(&d.body, &d, &links()),
            Err(RenderError::BrokenReference { .. })
        ));
    }

    #[test]
    fn render_document_splits_preview() {
        let d = doc("a.md", "Intro text\n<!-- truncate -->\nRest of article");
        let rendered = render_document(&d, &links()).unwrap();
        assert!(rendered.truncated);
        assert!(rendered.preview_html.contains("Intro text"));
        assert!(!rendered.preview_html.contains("Rest of article"));
        assert!(rendered.page_html.contains("Rest of article"));
        assert!(!rendered.page_html.contains("truncate"));
    }

    #[test]
    fn mdx_marker_not_rendered() {
        let d = doc("a.mdx", "Intro\n\n{/* truncate */}\n\nMore");
        let rendered = render_document(&d, &links()).unwrap();
        assert!(!rendered.page_html.contains("truncate"));
    }

    #[test]
    fn tables_enabled() {
        let d = doc("a.md", "| a | b |\n|---|---|\n| 1 | 2 |\n");
        let html = render_markdown(&d.body, &d, &links()).unwrap();
        assert!(html.contains("<table>"));
    }
}
