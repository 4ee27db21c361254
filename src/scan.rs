//! Content store: filesystem scanning and manifest generation.
//!
//! Stage 1 of the pipeline. Walks the content directory and produces a
//! [`Manifest`] of documents, assets, and redirect rules that the render and
//! generate stages consume.
//!
//! ## Directory Structure
//!
//! ```text
//! content/
//! ├── config.toml                          # Site configuration (optional)
//! ├── _redirects                           # Redirect table (optional)
//! ├── static/                              # Published at the site root
//! │   └── img/logo.png                     #   → /img/logo.png
//! ├── 2021-03-14-moving-house.md           # Post, slug "moving-house"
//! ├── 2022-07-01-default-timeouts/         # Post with colocated files
//! │   ├── index.md                         #   slug "default-timeouts"
//! │   └── chart.png                        #   → /assets/2022-07-01-default-timeouts/chart.png
//! └── drafts/
//!     └── half-written.mdx                 # `draft: true` posts are never published
//! ```
//!
//! ## Validation
//!
//! - Front-matter must parse; published posts need a title, a description,
//!   and at least one tag
//! - No two published posts may share a slug
//! - The redirect table must load (see [`crate::redirect`])

use crate::config::{self, SiteConfig};
use crate::frontmatter::{self, FrontMatterError};
use crate::naming::{parse_entry_name, sanitize_slug};
use crate::redirect::{RedirectError, RedirectTable};
use crate::render;
use crate::types::{Asset, AssetKind, Document};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Redirect table: {0}")]
    Redirect(#[from] RedirectError),
    #[error("{path}: {source}")]
    FrontMatter {
        path: String,
        source: FrontMatterError,
    },
    #[error("{0}: cannot derive a slug from the file name; set `slug` in front-matter")]
    EmptySlug(String),
    #[error("{path}: slug `{slug}` is reserved for generated listing pages")]
    ReservedSlug { slug: String, path: String },
    #[error("Slug `{slug}` is claimed by both {first} and {second}")]
    DuplicateSlug {
        slug: String,
        first: String,
        second: String,
    },
}

/// Manifest output from the scan stage.
#[derive(Debug, Serialize)]
pub struct Manifest {
    /// All documents, drafts included, sorted by id.
    pub documents: Vec<Document>,
    pub assets: Vec<Asset>,
    pub redirects: RedirectTable,
    pub config: SiteConfig,
}

impl Manifest {
    /// Documents that will be published.
    pub fn published(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter().filter(|d| !d.is_draft())
    }

    pub fn drafts(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter().filter(|d| d.is_draft())
    }
}

const DOCUMENT_EXTENSIONS: &[&str] = &["md", "mdx"];

pub fn scan(root: &Path) -> Result<Manifest, ScanError> {
    let config = config::load_config(root)?;

    let mut documents = Vec::new();
    let mut assets = Vec::new();

    let static_root = root.join(&config.content.static_dir);
    for path in walk_files(root, &static_root, &config)? {
        let rel = relative_id(root, &path);
        if is_document(&path) {
            documents.push(load_document(&path, rel, &config)?);
        } else {
            let url = format!("/{}/{}", config.content.colocated_route, rel);
            assets.push(Asset {
                kind: AssetKind::Colocated,
                path: rel,
                url,
            });
        }
    }

    if static_root.is_dir() {
        for entry in WalkDir::new(&static_root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || is_hidden(entry.path(), &static_root) {
                continue;
            }
            let rel = relative_id(&static_root, entry.path());
            assets.push(Asset {
                kind: AssetKind::Static,
                url: format!("/{rel}"),
                path: rel,
            });
        }
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    check_unique_slugs(&documents)?;

    let redirects = RedirectTable::load(&root.join(&config.content.redirects_file))?;

    tracing::info!(
        documents = documents.len(),
        assets = assets.len(),
        redirects = redirects.len(),
        "scanned content"
    );

    Ok(Manifest {
        documents,
        assets,
        redirects,
        config,
    })
}

/// Content files under `root`, excluding the static dir, hidden entries,
/// and the root-level config and redirect files.
fn walk_files(
    root: &Path,
    static_root: &Path,
    config: &SiteConfig,
) -> Result<Vec<PathBuf>, ScanError> {
    let reserved = [
        root.join("config.toml"),
        root.join(&config.content.redirects_file),
    ];
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() != static_root && !is_hidden(e.path(), root));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && !reserved.iter().any(|r| r == entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_hidden(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| {
            rel.components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        })
        .unwrap_or(false)
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext.as_str()))
}

/// Forward-slash path of `path` relative to `root`.
fn relative_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn load_document(path: &Path, id: String, config: &SiteConfig) -> Result<Document, ScanError> {
    let source = fs::read_to_string(path)?;
    let with_path = |source: FrontMatterError| ScanError::FrontMatter {
        path: id.clone(),
        source,
    };

    let (front_matter, body) = frontmatter::parse(&source).map_err(with_path)?;
    if front_matter.draft {
        tracing::debug!(document = %id, "draft, not published");
    } else {
        front_matter.check_required().map_err(with_path)?;
    }

    let stem = entry_stem(path);
    let parsed = parse_entry_name(&stem);
    let slug = sanitize_slug(front_matter.slug.as_deref().unwrap_or(&parsed.name));
    if slug.is_empty() {
        return Err(ScanError::EmptySlug(id));
    }

    let modified: DateTime<Utc> = fs::metadata(path)?.modified()?.into();
    let created = front_matter
        .date
        .or_else(|| {
            parsed
                .date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
        .unwrap_or(modified);

    let marker = render::find_marker(body, &config.index.truncate_markers);
    tracing::debug!(document = %id, slug = %slug, truncated = marker.is_some(), "loaded document");

    Ok(Document {
        id,
        slug,
        body: body.to_string(),
        front_matter,
        marker,
        created,
        modified,
    })
}

/// The stem that names a document: the file stem, or the parent directory
/// name for `index.md` files.
fn entry_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if stem.eq_ignore_ascii_case("index")
        && let Some(parent) = path.parent().and_then(|p| p.file_name())
    {
        return parent.to_string_lossy().to_string();
    }
    stem
}

/// Slugs the generator uses for its own pages under the route prefix.
const RESERVED_SLUGS: [&str; 2] = ["tags", "page"];

fn check_unique_slugs(documents: &[Document]) -> Result<(), ScanError> {
    let mut claimed: HashMap<&str, &str> = HashMap::new();
    for doc in documents.iter().filter(|d| !d.is_draft()) {
        if RESERVED_SLUGS.contains(&doc.slug.as_str()) {
            return Err(ScanError::ReservedSlug {
                slug: doc.slug.clone(),
                path: doc.id.clone(),
            });
        }
        if let Some(first) = claimed.insert(&doc.slug, &doc.id) {
            return Err(ScanError::DuplicateSlug {
                slug: doc.slug.clone(),
                first: first.to_string(),
                second: doc.id.clone(),
            });
        }
    }
    Ok(())
}
