//! # Quire
//!
//! A minimal static publishing pipeline for a personal developer blog.
//! Markdown/MDX posts with front-matter, a static asset tree, and a flat
//! redirect table go in; a rendered site comes out, and is published to a
//! hosting target through a staged, manually confirmed cutover.
//!
//! # Architecture: Build Pipeline, Then Publish
//!
//! ```text
//! 1. Scan      content/  →  Manifest         (filesystem → structured data)
//! 2. Render    Manifest  →  HTML fragments   (full pages + previews)
//! 3. Generate  Manifest  →  dist/            (final site + _redirects)
//!
//!    Publish   dist/     →  targets/<name>/  →  canonical.json
//! ```
//!
//! The scan manifest serializes to JSON (`quire scan` writes it to the temp
//! dir) so the content store can be inspected when a build misbehaves.
//! Rendering and generation are pure functions of the manifest plus the
//! source files it names.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Content store: walks the content directory, parses documents, classifies assets, loads redirects |
//! | [`frontmatter`] | YAML/TOML front-matter splitting, parsing, and required-field checks |
//! | [`render`] | Markdown → HTML, truncation-marker previews, reference checking |
//! | [`generate`] | Writes post, listing, tag, 404, feed, and redirect-stub pages using Maud |
//! | [`redirect`] | Redirect table parsing and validation, rule matching, request routing |
//! | [`publish`] | Staged hosting targets, health checks, canonical pointer cutover |
//! | [`serve`] | Local preview server routing through the redirect table |
//! | [`config`] | `config.toml` loading, stock defaults, merging, validation |
//! | [`types`] | Shared types serialized in the scan manifest (`Document`, `Asset`) |
//! | [`naming`] | `YYYY-MM-DD-name` filename convention and slug sanitizing |
//! | [`output`] | CLI output formatting for every stage |
//! | [`logging`] | `tracing` subscriber setup |
//!
//! # Design Decisions
//!
//! ## Previews Are Prefixes
//!
//! A listing preview is exactly the source text above the first truncation
//! marker, rendered. It is never summarized, word-counted, or cut mid-block
//! by the generator. Authors control what readers see in listings, and the
//! preview is always a prefix of the article. Long posts without a marker are
//! flagged rather than silently shown in full.
//!
//! ## Redirects Fail Fast
//!
//! Legacy URLs outlive every migration, so a broken redirect table is treated
//! as a build error, not a runtime surprise: duplicate sources, self
//! redirects, and placeholders that don't line up are rejected when the table
//! loads. The same [`redirect::Router`] answers `quire route`, the preview
//! server, and the publisher's health check.
//!
//! ## Cutover Is a Manual Gate
//!
//! Publishing never flips the live site on its own. `stage` and `verify` can
//! run in automation; `cutover` needs `--yes` and a passing health check,
//! and replaces the canonical pointer with a single rename. A failed check
//! leaves the pointer exactly as it was.
//!
//! ## Maud Over Template Engines
//!
//! HTML is generated with [Maud](https://maud.lambda.xyz/), a compile-time HTML
//! macro system. Malformed markup is a build error, template variables are Rust
//! expressions, interpolation is auto-escaped, and there is no template
//! directory to ship.

pub mod config;
pub mod frontmatter;
pub mod generate;
pub mod logging;
pub mod naming;
pub mod output;
pub mod publish;
pub mod redirect;
pub mod render;
pub mod scan;
pub mod serve;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
