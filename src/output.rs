//! CLI output formatting for all pipeline stages.
//!
//! # Information-First Display
//!
//! Output is **information-centric, not file-centric**. Every post leads with
//! its positional index and title; source paths and URLs are secondary
//! context on indented lines. This keeps the output readable as a content
//! inventory while still letting users trace data back to specific files.
//!
//! # Output Format
//!
//! ## Scan
//!
//! ```text
//! Posts
//! 001 Moving house
//!     Source: 2021-03-14-moving-house.md
//!     URL: /blog/moving-house/
//!     Preview: truncated
//!
//! Drafts
//!     drafts/half-written.md
//!
//! Assets
//!     3 static, 1 colocated
//!
//! Redirects
//!     4 rules from _redirects
//! ```
//!
//! ## Build
//!
//! ```text
//! Home → index.html
//! 001 Edge cutover → /blog/workers-cutover/
//! 002 Default timeouts → /blog/default-timeouts/
//! Listing: 1 page
//! Tags: cloudflare (1), meta (2)
//! Redirects: 4 rules, 2 stubs
//! Feed → rss.xml
//! Warning: long.md has no truncation marker (4800 chars, threshold 3000)
//! Generated 2 posts, 1 listing page, 2 tag pages
//! ```
//!
//! # Architecture
//!
//! Each stage has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::generate::BuildReport;
use crate::publish::{CanonicalPointer, DeployManifest, HealthReport, TargetSummary};
use crate::redirect::Resolution;
use crate::render::PreviewWarning;
use crate::scan::Manifest;
use crate::types::AssetKind;
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate_desc(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn warning_line(warning: &PreviewWarning) -> String {
    format!(
        "Warning: {} has no truncation marker ({} chars, threshold {})",
        warning.document, warning.length, warning.threshold
    )
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Scan output
// ============================================================================

/// Format scan output: posts, drafts, assets, and redirect rules.
pub fn format_scan_output(manifest: &Manifest, source_root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    let prefix = &manifest.config.content.route_prefix;

    lines.push("Posts".to_string());
    for (i, doc) in manifest.published().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), doc.title()));
        lines.push(format!("    Source: {}", doc.id));
        lines.push(format!(
            "    URL: {}",
            crate::render::permalink(prefix, &doc.slug)
        ));
        let description = truncate_desc(doc.front_matter.description().trim(), 60);
        if !description.is_empty() {
            lines.push(format!("    {}", description));
        }
        let preview = if doc.marker.is_some() {
            "truncated"
        } else {
            "full body"
        };
        lines.push(format!("    Preview: {}", preview));
    }

    let drafts: Vec<_> = manifest.drafts().collect();
    if !drafts.is_empty() {
        lines.push(String::new());
        lines.push("Drafts".to_string());
        for doc in drafts {
            lines.push(format!("    {}", doc.id));
        }
    }

    let static_count = manifest
        .assets
        .iter()
        .filter(|a| a.kind == AssetKind::Static)
        .count();
    lines.push(String::new());
    lines.push("Assets".to_string());
    lines.push(format!(
        "    {} static, {} colocated",
        static_count,
        manifest.assets.len() - static_count
    ));

    lines.push(String::new());
    lines.push("Redirects".to_string());
    lines.push(format!(
        "    {} from {}",
        plural(manifest.redirects.len(), "rule", "rules"),
        manifest.config.content.redirects_file
    ));

    lines.push(String::new());
    lines.push("Config".to_string());
    if source_root.join("config.toml").exists() {
        lines.push("    config.toml".to_string());
    } else {
        lines.push("    (stock defaults)".to_string());
    }

    lines
}

/// Print scan output to stdout.
pub fn print_scan_output(manifest: &Manifest, source_root: &Path) {
    print_lines(format_scan_output(manifest, source_root));
}

// ============================================================================
// Build output
// ============================================================================

/// Format the generate stage report.
pub fn format_build_report(report: &BuildReport) -> Vec<String> {
    let mut lines = vec!["Home \u{2192} index.html".to_string()];

    for (i, (title, url)) in report.posts.iter().enumerate() {
        lines.push(format!("{} {} \u{2192} {}", format_index(i + 1), title, url));
    }

    lines.push(format!(
        "Listing: {}",
        plural(report.listing_pages, "page", "pages")
    ));
    if !report.tags.is_empty() {
        let tags: Vec<String> = report
            .tags
            .iter()
            .map(|(name, count)| format!("{} ({})", name, count))
            .collect();
        lines.push(format!("Tags: {}", tags.join(", ")));
    }
    lines.push(format!(
        "Redirects: {}, {}",
        plural(report.redirects, "rule", "rules"),
        plural(report.redirect_stubs.len(), "stub", "stubs")
    ));
    for source in &report.shadowed_redirects {
        lines.push(format!("    {} shadowed by a generated page", source));
    }
    if report.feed {
        lines.push("Feed \u{2192} rss.xml".to_string());
    }
    if report.drafts > 0 {
        lines.push(format!(
            "Skipped {}",
            plural(report.drafts, "draft", "drafts")
        ));
    }
    for warning in &report.warnings {
        lines.push(warning_line(warning));
    }

    lines.push(format!(
        "Generated {}, {}, {}",
        plural(report.posts.len(), "post", "posts"),
        plural(report.listing_pages, "listing page", "listing pages"),
        plural(report.tags.len(), "tag page", "tag pages"),
    ));
    lines
}

/// Print build output to stdout.
pub fn print_build_report(report: &BuildReport) {
    print_lines(format_build_report(report));
}

// ============================================================================
// Route output
// ============================================================================

/// Format how a request path resolves.
pub fn format_route(request: &str, resolution: &Resolution, output_root: &Path) -> Vec<String> {
    let line = match resolution {
        Resolution::Redirect { location, status } => {
            format!("{} \u{2192} {} {}", request, status, location)
        }
        Resolution::Content(path) => {
            let shown = path.strip_prefix(output_root).unwrap_or(path);
            format!("{} \u{2192} 200 {}", request, shown.display())
        }
        Resolution::NotFound => format!("{} \u{2192} 404 not found", request),
    };
    vec![line]
}

/// Print route output to stdout.
pub fn print_route(request: &str, resolution: &Resolution, output_root: &Path) {
    print_lines(format_route(request, resolution, output_root));
}

// ============================================================================
// Publish output
// ============================================================================

/// Format the result of staging a target.
pub fn format_stage(manifest: &DeployManifest) -> Vec<String> {
    vec![
        format!(
            "Staged {} ({})",
            manifest.target,
            plural(manifest.files.len(), "file", "files")
        ),
        format!("    Digest: {}", manifest.digest),
    ]
}

pub fn print_stage(manifest: &DeployManifest) {
    print_lines(format_stage(manifest));
}

/// Format a health report, one line per check.
pub fn format_health_report(report: &HealthReport) -> Vec<String> {
    let mut lines = vec![format!("Health checks for {}", report.target)];
    for check in &report.checks {
        match &check.failure {
            None => lines.push(format!("    ok    {}", check.name)),
            Some(reason) => lines.push(format!("    FAIL  {}: {}", check.name, reason)),
        }
    }
    let failed = report.checks.iter().filter(|c| !c.passed()).count();
    if failed == 0 {
        lines.push(format!("{} is ready for cutover", report.target));
    } else {
        lines.push(format!(
            "{} failed {}",
            report.target,
            plural(failed, "check", "checks")
        ));
    }
    lines
}

pub fn print_health_report(report: &HealthReport) {
    print_lines(format_health_report(report));
}

/// Format the canonical pointer and the staged targets.
pub fn format_status(pointer: Option<&CanonicalPointer>, targets: &[TargetSummary]) -> Vec<String> {
    let mut lines = Vec::new();
    match pointer {
        Some(p) => {
            lines.push(format!("Canonical: {}", p.target));
            lines.push(format!("    Digest: {}", p.digest));
            lines.push(format!("    Since: {}", p.switched_at.to_rfc3339()));
            if let Some(previous) = &p.previous {
                lines.push(format!("    Previous: {}", previous));
            }
        }
        None => lines.push("Canonical: (none)".to_string()),
    }

    lines.push(String::new());
    lines.push("Targets".to_string());
    if targets.is_empty() {
        lines.push("    (none staged)".to_string());
    }
    for target in targets {
        let marker = if target.canonical { " *" } else { "" };
        let digest = target
            .digest
            .as_deref()
            .map(|d| d.get(..12).unwrap_or(d))
            .unwrap_or("no manifest");
        lines.push(format!("    {}{} {}", target.name, marker, digest));
    }
    lines
}

pub fn print_status(pointer: Option<&CanonicalPointer>, targets: &[TargetSummary]) {
    print_lines(format_status(pointer, targets));
}

// ============================================================================
// Tests
// ============================================================================
