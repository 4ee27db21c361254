//! Site configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. A single file at the
//! content root is layered over the stock defaults: user files are sparse and
//! only name the values they change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [site]
//! title = "Notes"
//! description = "A developer blog"
//! base_url = ""             # e.g. "https://example.dev" (required for the feed)
//! language = "en"
//!
//! [content]
//! static_dir = "static"     # Published at the site root
//! redirects_file = "_redirects"
//! route_prefix = "blog"     # Posts live at /blog/<slug>/
//! colocated_route = "assets" # Colocated files live at /assets/<path>
//!
//! [index]
//! preview_count = 10
//! preview_threshold = 3000  # Characters; longer posts without a marker are flagged
//! truncate_markers = ["<!-- truncate -->", "<!--truncate-->", "{/* truncate */}"]
//! strict_previews = false
//!
//! [feed]
//! enabled = true
//! limit = 20
//!
//! [publish]
//! root = ".quire-hosting"
//! required_files = ["index.html", "404.html"]
//! # max_threads = 4
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Site configuration loaded from `config.toml`.
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Site identity used in page chrome and the feed.
    pub site: SiteInfo,
    /// Where content lives and where it is published.
    pub content: ContentConfig,
    /// Index listing and preview rules.
    pub index: IndexConfig,
    /// RSS feed settings.
    pub feed: FeedConfig,
    /// Hosting targets and cutover checks.
    pub publish: PublishConfig,
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.preview_count == 0 {
            return Err(ConfigError::Validation(
                "index.preview_count must be at least 1".into(),
            ));
        }
        if self.index.preview_threshold == 0 {
            return Err(ConfigError::Validation(
                "index.preview_threshold must be at least 1".into(),
            ));
        }
        if self.index.truncate_markers.is_empty()
            || self.index.truncate_markers.iter().any(|m| m.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "index.truncate_markers must contain at least one non-empty marker".into(),
            ));
        }
        for (key, value) in [
            ("content.route_prefix", &self.content.route_prefix),
            ("content.colocated_route", &self.content.colocated_route),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(ConfigError::Validation(format!(
                    "{key} must be a single non-empty path segment"
                )));
            }
        }
        if self.content.route_prefix == self.content.colocated_route {
            return Err(ConfigError::Validation(
                "content.route_prefix and content.colocated_route must differ".into(),
            ));
        }
        if self.feed.limit == 0 {
            return Err(ConfigError::Validation("feed.limit must be at least 1".into()));
        }
        if !self.site.base_url.is_empty()
            && !(self.site.base_url.starts_with("http://")
                || self.site.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(
                "site.base_url must start with http:// or https://".into(),
            ));
        }
        Ok(())
    }
}

/// Site identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteInfo {
    pub title: String,
    pub description: String,
    /// Absolute origin the site is served from. Empty disables the feed.
    pub base_url: String,
    pub language: String,
}

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            title: "Notes".to_string(),
            description: "A developer blog".to_string(),
            base_url: String::new(),
            language: "en".to_string(),
        }
    }
}

/// Content layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContentConfig {
    /// Directory (relative to the content root) copied verbatim to the site root.
    pub static_dir: String,
    /// Redirect table file name, looked up in the content root.
    pub redirects_file: String,
    /// First path segment of every post URL.
    pub route_prefix: String,
    /// First path segment under which colocated files are published.
    pub colocated_route: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            static_dir: "static".to_string(),
            redirects_file: "_redirects".to_string(),
            route_prefix: "blog".to_string(),
            colocated_route: "assets".to_string(),
        }
    }
}

/// Index listing and preview rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Maximum previews per listing page.
    pub preview_count: usize,
    /// Body length (characters) above which a post without a marker is flagged.
    pub preview_threshold: usize,
    /// Markers delimiting the preview; the earliest occurrence of any wins.
    pub truncate_markers: Vec<String>,
    /// Turn preview flags into build errors.
    pub strict_previews: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            preview_count: 10,
            preview_threshold: 3000,
            truncate_markers: vec![
                "<!-- truncate -->".to_string(),
                "<!--truncate-->".to_string(),
                "{/* truncate */}".to_string(),
            ],
            strict_previews: false,
        }
    }
}

/// RSS feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub enabled: bool,
    /// Number of most recent posts included.
    pub limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 20,
        }
    }
}

/// Publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Hosting root holding `targets/` and the canonical pointer.
    pub root: String,
    /// Files that must exist in a target before it may become canonical.
    pub required_files: Vec<String>,
    /// Maximum hashing threads. When absent, all cores are used.
    pub max_threads: Option<usize>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            root: ".quire-hosting".to_string(),
            required_files: vec!["index.html".to_string(), "404.html".to_string()],
            max_threads: None,
        }
    }
}

/// Resolve the effective thread count for publish hashing.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)`, never less than one
pub fn effective_threads(config: &PublishConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_threads
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// Tables merge key-by-key; any other overlay value replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the content root.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    let overlay = load_raw_config(root)?;
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock `config.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# quire configuration
# ===================
# All settings are optional. Values shown below are the defaults.
# Place this file at the root of the content directory.
# Unknown keys cause an error.

# ---------------------------------------------------------------------------
# Site identity
# ---------------------------------------------------------------------------
[site]
title = "Notes"
description = "A developer blog"
# Absolute origin, e.g. "https://example.dev". The RSS feed is only written
# when this is set.
base_url = ""
language = "en"

# ---------------------------------------------------------------------------
# Content layout
# ---------------------------------------------------------------------------
[content]
# Copied verbatim to the site root: static/img/logo.png -> /img/logo.png
static_dir = "static"
# Redirect table: one "<source> <destination> [status]" rule per line.
redirects_file = "_redirects"
# Posts are published at /<route_prefix>/<slug>/
route_prefix = "blog"
# Files next to posts are published at /<colocated_route>/<path>
colocated_route = "assets"

# ---------------------------------------------------------------------------
# Index listing
# ---------------------------------------------------------------------------
[index]
# Previews per listing page.
preview_count = 10
# Posts without a truncation marker longer than this (characters) are flagged.
preview_threshold = 3000
# Everything before the first marker becomes the preview.
truncate_markers = ["<!-- truncate -->", "<!--truncate-->", "{/* truncate */}"]
# Fail the build instead of warning about flagged posts.
strict_previews = false

# ---------------------------------------------------------------------------
# RSS feed
# ---------------------------------------------------------------------------
[feed]
enabled = true
limit = 20

# ---------------------------------------------------------------------------
# Publishing
# ---------------------------------------------------------------------------
[publish]
# Hosting root: targets/<name>/ deployments plus the canonical pointer.
root = ".quire-hosting"
# A target must contain these files before it can become canonical.
required_files = ["index.html", "404.html"]
# Maximum hashing threads. Omit to use all cores.
# max_threads = 4
"##
}
