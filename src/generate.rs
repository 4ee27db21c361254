//! HTML site generation.
//!
//! Stage 3 of the pipeline. Takes the scan manifest, renders every published
//! document (see [`crate::render`]), and writes the final static site.
//!
//! ## Generated Pages
//!
//! - **Post pages** (`/{prefix}/{slug}/index.html`): full rendered document
//! - **Listing pages** (`/{prefix}/`, `/{prefix}/page/{n}/`): previews, newest first
//! - **Tag pages** (`/{prefix}/tags/`, `/{prefix}/tags/{tag}/`): tag index and per-tag previews
//! - **Home** (`/index.html`): the first listing page
//! - **Not found** (`/404.html`)
//! - **Feed** (`/rss.xml`): RSS 2.0, only when `site.base_url` is set
//!
//! ## Output Structure
//!
//! ```text
//! dist/
//! ├── index.html
//! ├── 404.html
//! ├── rss.xml
//! ├── _redirects                  # Redirect table, same line format as the source
//! ├── img/logo.png                # Static assets, copied to the root
//! ├── assets/
//! │   └── 2022-07-01-default-timeouts/chart.png   # Colocated assets
//! ├── blog/
//! │   ├── index.html              # Listing page 1
//! │   ├── page/2/index.html
//! │   ├── tags/
//! │   │   ├── index.html
//! │   │   └── networking/index.html
//! │   └── moving-house/index.html # Post page
//! └── 2019/04/01/hello-world.html # Meta-refresh stub for a legacy URL
//! ```
//!
//! ## Redirect Stubs
//!
//! Static hosts that ignore `_redirects` still need the legacy URLs to land
//! somewhere. Every placeholder-free rule gets a tiny HTML page at its source
//! path that meta-refreshes to the destination, unless a generated page
//! already lives there.
//!
//! ## HTML Generation
//!
//! Uses [maud](https://maud.lambda.xyz/) for compile-time HTML templating.
//! Templates are type-safe Rust code with automatic XSS escaping.

use crate::config::SiteConfig;
use crate::naming::sanitize_slug;
use crate::redirect::RedirectRule;
use crate::render::{self, PreviewWarning, RenderError, RenderOutput, RenderedDocument};
use crate::scan::Manifest;
use crate::types::{AssetKind, Document};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use rss::{CategoryBuilder, ChannelBuilder, GuidBuilder, ItemBuilder};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Refusing to build into {0}: it contains the content directory")]
    UnsafeOutput(PathBuf),
}

/// Summary of a build, consumed by [`crate::output`].
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Published posts, newest first: `(title, url)`.
    pub posts: Vec<(String, String)>,
    pub listing_pages: usize,
    /// Tag display name and post count, sorted by tag slug.
    pub tags: Vec<(String, usize)>,
    pub drafts: usize,
    pub assets: usize,
    pub redirects: usize,
    /// Output paths of meta-refresh stubs.
    pub redirect_stubs: Vec<String>,
    /// Literal redirect sources skipped because a generated page is there.
    pub shadowed_redirects: Vec<String>,
    pub feed: bool,
    pub warnings: Vec<PreviewWarning>,
}

const CSS: &str = include_str!("../static/style.css");

/// A published document paired with its rendered HTML.
struct Post<'a> {
    doc: &'a Document,
    rendered: &'a RenderedDocument,
    url: String,
}

/// A tag and the posts carrying it, newest first.
struct TagGroup<'a> {
    name: &'a str,
    slug: String,
    posts: Vec<&'a Post<'a>>,
}

pub fn generate(
    manifest: &Manifest,
    source_root: &Path,
    output_dir: &Path,
    strict: bool,
) -> Result<BuildReport, GenerateError> {
    let rendered = render::render_all(manifest, strict)?;
    let config = &manifest.config;
    let prefix = config.content.route_prefix.as_str();

    prepare_output(source_root, output_dir)?;
    let assets = copy_assets(manifest, source_root, output_dir)?;

    let posts = collect_posts(manifest, &rendered);
    let mut report = BuildReport {
        posts: posts
            .iter()
            .map(|p| (p.doc.title().to_string(), p.url.clone()))
            .collect(),
        drafts: manifest.drafts().count(),
        assets,
        redirects: manifest.redirects.len(),
        warnings: rendered.warnings.clone(),
        ..Default::default()
    };

    for post in &posts {
        write_page(output_dir, &post.url, render_post_page(post, config))?;
        tracing::debug!(document = %post.doc.id, url = %post.url, "wrote post");
    }

    // Listing pages; an empty site still gets page 1.
    let per_page = config.index.preview_count.max(1);
    let empty: &[Post] = &[];
    let pages: Vec<&[Post]> = if posts.is_empty() {
        vec![empty]
    } else {
        posts.chunks(per_page).collect()
    };
    for (idx, chunk) in pages.iter().enumerate() {
        let number = idx + 1;
        let markup = render_listing_page(chunk, number, pages.len(), config);
        write_page(output_dir, &listing_url(prefix, number), markup)?;
    }
    report.listing_pages = pages.len();

    let home = render_listing_page(pages[0], 1, pages.len(), config);
    write_page(output_dir, "/", home)?;

    let tags = group_by_tag(&posts);
    write_page(
        output_dir,
        &tags_url(prefix),
        render_tags_index(&tags, config),
    )?;
    for tag in &tags {
        write_page(
            output_dir,
            &tag_url(prefix, &tag.slug),
            render_tag_page(tag, config),
        )?;
    }
    report.tags = tags
        .iter()
        .map(|t| (t.name.to_string(), t.posts.len()))
        .collect();

    fs::write(
        output_dir.join("404.html"),
        render_not_found(config).into_string(),
    )?;

    if config.feed.enabled && !config.site.base_url.is_empty() {
        fs::write(output_dir.join("rss.xml"), render_feed(&posts, config))?;
        report.feed = true;
    } else {
        tracing::debug!("feed disabled or no base_url; skipping rss.xml");
    }

    fs::write(
        output_dir.join("_redirects"),
        manifest.redirects.to_table_text(),
    )?;
    for rule in manifest.redirects.rules.iter().filter(|r| r.is_literal()) {
        let Some(relative) = stub_path(&rule.source) else {
            continue;
        };
        let target = output_dir.join(&relative);
        if target.exists() {
            tracing::warn!(source = %rule.source, "redirect source shadowed by a generated page");
            report.shadowed_redirects.push(rule.source.clone());
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, render_redirect_stub(rule).into_string())?;
        report.redirect_stubs.push(relative);
    }

    tracing::info!(
        posts = report.posts.len(),
        listing_pages = report.listing_pages,
        tags = report.tags.len(),
        stubs = report.redirect_stubs.len(),
        output = %output_dir.display(),
        "site generated"
    );
    Ok(report)
}

/// Start from an empty output directory.
fn prepare_output(source_root: &Path, output_dir: &Path) -> Result<(), GenerateError> {
    if output_dir.exists() {
        let source = fs::canonicalize(source_root)?;
        let output = fs::canonicalize(output_dir)?;
        if source.starts_with(&output) {
            return Err(GenerateError::UnsafeOutput(output_dir.to_path_buf()));
        }
        fs::remove_dir_all(output_dir)?;
    }
    fs::create_dir_all(output_dir)?;
    Ok(())
}

fn copy_assets(
    manifest: &Manifest,
    source_root: &Path,
    output_dir: &Path,
) -> Result<usize, GenerateError> {
    let static_root = source_root.join(&manifest.config.content.static_dir);
    for asset in &manifest.assets {
        let src = match asset.kind {
            AssetKind::Static => static_root.join(&asset.path),
            AssetKind::Colocated => source_root.join(&asset.path),
        };
        let dst = output_dir.join(asset.url.trim_start_matches('/'));
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dst)?;
    }
    Ok(manifest.assets.len())
}

/// Published posts sorted newest first, slug ascending on ties.
fn collect_posts<'a>(manifest: &'a Manifest, rendered: &'a RenderOutput) -> Vec<Post<'a>> {
    let prefix = &manifest.config.content.route_prefix;
    let mut posts: Vec<Post> = manifest
        .published()
        .filter_map(|doc| {
            rendered.get(&doc.id).map(|r| Post {
                doc,
                rendered: r,
                url: render::permalink(prefix, &doc.slug),
            })
        })
        .collect();
    posts.sort_by(|a, b| {
        b.doc
            .created
            .cmp(&a.doc.created)
            .then_with(|| a.doc.slug.cmp(&b.doc.slug))
    });
    posts
}

fn group_by_tag<'a>(posts: &'a [Post<'a>]) -> Vec<TagGroup<'a>> {
    let mut groups: BTreeMap<String, TagGroup<'a>> = BTreeMap::new();
    for post in posts {
        for tag in &post.doc.front_matter.tags {
            let slug = sanitize_slug(tag);
            if slug.is_empty() {
                continue;
            }
            groups
                .entry(slug.clone())
                .or_insert_with(|| TagGroup {
                    name: tag,
                    slug,
                    posts: Vec::new(),
                })
                .posts
                .push(post);
        }
    }
    groups.into_values().collect()
}

/// Write `markup` at a site URL; URLs ending in `/` get an `index.html`.
fn write_page(output_dir: &Path, url: &str, markup: Markup) -> std::io::Result<()> {
    let relative = url.trim_start_matches('/');
    let path = if relative.is_empty() || relative.ends_with('/') {
        output_dir.join(relative).join("index.html")
    } else {
        output_dir.join(relative)
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, markup.into_string())
}

/// Output-relative file for a literal redirect source. Sources whose last
/// segment has an extension (`/old/post.html`) are written as that file,
/// others as `<source>/index.html`. Returns `None` for the site root and for
/// paths that would leave the output directory.
fn stub_path(source: &str) -> Option<String> {
    let relative = source.trim_start_matches('/');
    if relative.is_empty()
        || Path::new(relative)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    let last = relative.rsplit('/').next().unwrap_or(relative);
    if last.contains('.') {
        Some(relative.to_string())
    } else {
        Some(format!("{relative}/index.html"))
    }
}

// ============================================================================
// URLs
// ============================================================================

pub fn listing_url(prefix: &str, page: usize) -> String {
    if page <= 1 {
        format!("/{prefix}/")
    } else {
        format!("/{prefix}/page/{page}/")
    }
}

pub fn tags_url(prefix: &str) -> String {
    format!("/{prefix}/tags/")
}

pub fn tag_url(prefix: &str, tag_slug: &str) -> String {
    format!("/{prefix}/tags/{tag_slug}/")
}

// ============================================================================
// HTML Components
// ============================================================================

/// Renders the base HTML document structure
fn base_document(title: &str, description: &str, config: &SiteConfig, content: Markup) -> Markup {
    let site = &config.site;
    let feed = config.feed.enabled && !site.base_url.is_empty();
    html! {
        (DOCTYPE)
        html lang=(site.language) {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                @if !description.is_empty() {
                    meta name="description" content=(description);
                }
                @if feed {
                    link rel="alternate" type="application/rss+xml" title=(site.title) href="/rss.xml";
                }
                style { (PreEscaped(CSS)) }
            }
            body {
                (site_header(config))
                main { (content) }
                footer.site-footer {
                    p { (site.title) }
                }
            }
        }
    }
}

/// Renders the site header with title and navigation
fn site_header(config: &SiteConfig) -> Markup {
    let prefix = &config.content.route_prefix;
    let feed = config.feed.enabled && !config.site.base_url.is_empty();
    html! {
        header.site-header {
            a.site-title href="/" { (config.site.title) }
            nav.site-nav {
                a href=(listing_url(prefix, 1)) { "Posts" }
                a href=(tags_url(prefix)) { "Tags" }
                @if feed {
                    a href="/rss.xml" { "RSS" }
                }
            }
        }
    }
}

fn post_meta(post: &Post, prefix: &str) -> Markup {
    let created = post.doc.created;
    html! {
        p.post-meta {
            time datetime=(created.to_rfc3339()) { (created.format("%Y-%m-%d")) }
            " · "
            (post.rendered.reading_minutes) " min read"
            @if let Some(category) = &post.doc.front_matter.category {
                " · " (category)
            }
        }
        @if !post.doc.front_matter.tags.is_empty() {
            p.tags {
                @for tag in &post.doc.front_matter.tags {
                    a href=(tag_url(prefix, &sanitize_slug(tag))) { "#" (tag) }
                }
            }
        }
    }
}

fn render_post_page(post: &Post, config: &SiteConfig) -> Markup {
    let prefix = &config.content.route_prefix;
    let title = format!("{} · {}", post.doc.title(), config.site.title);
    let content = html! {
        article.post {
            h1 { (post.doc.title()) }
            (post_meta(post, prefix))
            (PreEscaped(&post.rendered.page_html))
        }
    };
    base_document(&title, post.doc.front_matter.description(), config, content)
}

fn render_preview(post: &Post, prefix: &str) -> Markup {
    html! {
        article.preview {
            h2 { a href=(post.url) { (post.doc.title()) } }
            (post_meta(post, prefix))
            (PreEscaped(&post.rendered.preview_html))
            @if post.rendered.truncated {
                a.read-more href=(post.url) { "Read more →" }
            }
        }
    }
}

fn render_listing_page(
    posts: &[Post],
    page: usize,
    total_pages: usize,
    config: &SiteConfig,
) -> Markup {
    let prefix = &config.content.route_prefix;
    let title = if page <= 1 {
        config.site.title.clone()
    } else {
        format!("{} · page {page}", config.site.title)
    };
    let content = html! {
        @if posts.is_empty() {
            p { "Nothing published yet." }
        }
        @for post in posts {
            (render_preview(post, prefix))
        }
        @if total_pages > 1 {
            nav.pagination {
                @if page > 1 {
                    a rel="prev" href=(listing_url(prefix, page - 1)) { "← Newer" }
                } @else {
                    span {}
                }
                span { "Page " (page) " of " (total_pages) }
                @if page < total_pages {
                    a rel="next" href=(listing_url(prefix, page + 1)) { "Older →" }
                } @else {
                    span {}
                }
            }
        }
    };
    base_document(&title, &config.site.description, config, content)
}

fn render_tags_index(tags: &[TagGroup], config: &SiteConfig) -> Markup {
    let prefix = &config.content.route_prefix;
    let content = html! {
        h1 { "Tags" }
        ul.tag-index {
            @for tag in tags {
                li {
                    a href=(tag_url(prefix, &tag.slug)) { (tag.name) }
                    " (" (tag.posts.len()) ")"
                }
            }
        }
    };
    base_document(
        &format!("Tags · {}", config.site.title),
        &config.site.description,
        config,
        content,
    )
}

fn render_tag_page(tag: &TagGroup, config: &SiteConfig) -> Markup {
    let prefix = &config.content.route_prefix;
    let content = html! {
        h1 { "Tagged “" (tag.name) "”" }
        @for post in &tag.posts {
            (render_preview(post, prefix))
        }
    };
    base_document(
        &format!("{} · {}", tag.name, config.site.title),
        &config.site.description,
        config,
        content,
    )
}

fn render_not_found(config: &SiteConfig) -> Markup {
    let content = html! {
        h1 { "Page not found" }
        p {
            "Nothing lives at this address. Try the "
            a href=(listing_url(&config.content.route_prefix, 1)) { "post index" }
            "."
        }
    };
    base_document(
        &format!("Not found · {}", config.site.title),
        "",
        config,
        content,
    )
}

fn render_redirect_stub(rule: &RedirectRule) -> Markup {
    let location = &rule.destination;
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="UTF-8";
                title { "Redirecting…" }
                meta http-equiv="refresh" content=(format!("0; url={location}"));
                link rel="canonical" href=(location);
                meta name="robots" content="noindex";
            }
            body {
                p { "Moved to " a href=(location) { (location) } "." }
            }
        }
    }
}

fn render_feed(posts: &[Post], config: &SiteConfig) -> String {
    let base_url = config.site.base_url.trim_end_matches('/');
    let items: Vec<rss::Item> = posts
        .iter()
        .take(config.feed.limit)
        .map(|post| {
            let link = format!("{base_url}{}", post.url);
            let categories = post
                .doc
                .front_matter
                .tags
                .iter()
                .map(|tag| CategoryBuilder::default().name(tag.clone()).build())
                .collect::<Vec<_>>();
            ItemBuilder::default()
                .title(post.doc.title().to_string())
                .link(Some(link.clone()))
                .guid(GuidBuilder::default().permalink(true).value(link).build())
                .description(post.doc.front_matter.description().to_string())
                .content(post.rendered.preview_html.clone())
                .pub_date(post.doc.created.to_rfc2822())
                .categories(categories)
                .build()
        })
        .collect();

    let channel = ChannelBuilder::default()
        .title(config.site.title.clone())
        .link(format!("{base_url}/"))
        .description(config.site.description.clone())
        .language(config.site.language.clone())
        .generator("quire".to_string())
        .items(items)
        .build();
    channel.to_string()
}

// ============================================================================
// Tests
// ============================================================================
