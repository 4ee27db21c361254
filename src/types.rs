//! Shared types passed between the scan, render, and generate stages.
//!
//! These are serialized into the scan manifest (`quire scan`) so the content
//! store can be inspected as JSON.

use crate::frontmatter::FrontMatter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of the truncation marker inside a document body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// Byte offset where the marker starts.
    pub offset: usize,
    /// Byte length of the marker text.
    pub len: usize,
}

/// A source document: front-matter plus body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Content-relative source path with forward slashes, e.g.
    /// `2021-03-14-moving/index.md`. Unique per document.
    pub id: String,
    /// URL slug. The page is published at `/<route_prefix>/<slug>/`.
    pub slug: String,
    pub front_matter: FrontMatter,
    /// Body after the front-matter block, untouched.
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<Marker>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Document {
    pub fn is_draft(&self) -> bool {
        self.front_matter.draft
    }

    pub fn title(&self) -> &str {
        self.front_matter.title()
    }

    /// Content-relative directory holding the source file (`""` at the root).
    pub fn source_dir(&self) -> &str {
        self.id.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }
}

/// Where an asset comes from, which decides where it is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Under the static directory, published at the site root.
    Static,
    /// Next to documents in the content tree, published under the colocated route.
    Colocated,
}

/// A binary resource referenced by documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub kind: AssetKind,
    /// Path relative to its root (the static dir or the content root).
    pub path: String,
    /// URL path the asset is published at, always starting with `/`.
    pub url: String,
}
