//! Shared test utilities for the quire test suite.
//!
//! Provides fixture setup, lookup helpers, and bulk extractors that work with
//! scan-phase data structures (`Manifest`, `Document`).
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! let manifest = scan(tmp.path()).unwrap();
//!
//! let doc = find_document(&manifest, "moving-house");
//! assert!(doc.marker.is_some());
//! ```

use std::path::Path;
use tempfile::TempDir;

use crate::scan::Manifest;
use crate::types::Document;

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/content/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/content");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

// =========================================================================
// Manifest lookups: panic with a clear message on miss
// =========================================================================

/// Find a document by slug. Panics if not found.
pub fn find_document<'a>(manifest: &'a Manifest, slug: &str) -> &'a Document {
    manifest
        .documents
        .iter()
        .find(|d| d.slug == slug)
        .unwrap_or_else(|| {
            let slugs: Vec<&str> = manifest.documents.iter().map(|d| d.slug.as_str()).collect();
            panic!("document '{slug}' not found. Available: {slugs:?}")
        })
}

// =========================================================================
// Bulk extractors
// =========================================================================

/// All document ids in manifest order.
pub fn document_ids(manifest: &Manifest) -> Vec<&str> {
    manifest.documents.iter().map(|d| d.id.as_str()).collect()
}

/// All asset URLs in manifest order.
pub fn asset_urls(manifest: &Manifest) -> Vec<&str> {
    manifest.assets.iter().map(|a| a.url.as_str()).collect()
}
