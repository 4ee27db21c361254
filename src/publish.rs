//! Staged deployment and canonical cutover.
//!
//! A hosting root is a directory of named deployments plus one pointer file
//! naming the deployment that is live:
//!
//! ```text
//! .quire-hosting/
//! ├── canonical.json              # { target, digest, switched_at, previous }
//! └── targets/
//!     ├── blue/
//!     │   ├── deploy-manifest.json
//!     │   ├── index.html
//!     │   └── ...
//!     └── green/
//! ```
//!
//! Whatever serves the domain (a web server root symlink, a sync job) reads
//! `canonical.json`. Deploying is three manual steps:
//!
//! 1. [`HostingRoot::stage`] copies a built site into a target that is not live
//! 2. [`HostingRoot::verify`] runs the health checks against that target
//! 3. [`HostingRoot::cutover`] repoints `canonical.json`, only with explicit
//!    confirmation and only if verification passes
//!
//! The pointer is replaced by writing a temp file and renaming it over the
//! old one, so readers see either the previous pointer or the new one. A
//! failed cutover leaves the previous pointer untouched. There is no
//! automatic rollback: cutting back over to the previous target is the
//! rollback.
//!
//! ## Deploy manifest
//!
//! Staging records a SHA-256 per file (hashed in parallel on the rayon pool)
//! and an aggregate digest over the sorted `(path, hash)` list. Verification
//! recomputes both, so any file changed, added, or removed after staging
//! fails the check.

use crate::config::PublishConfig;
use crate::redirect::{OutputDir, RedirectTable, Resolution, Router};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Deploy manifest written into every staged target.
pub const MANIFEST_FILENAME: &str = "deploy-manifest.json";
const POINTER_FILENAME: &str = "canonical.json";
const TARGETS_DIR: &str = "targets";
const STAGING_SUFFIX: &str = ".staging";
const MANIFEST_VERSION: u32 = 1;
/// Redirect hops followed when checking that a destination lands on content.
const MAX_REDIRECT_HOPS: usize = 5;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Invalid target name `{0}` (use letters, digits, `-`, `_`, `.`)")]
    InvalidTarget(String),
    #[error("Site directory {0} does not exist or is empty; run `quire build` first")]
    MissingSite(PathBuf),
    #[error("Target `{0}` is live; stage into a different target")]
    TargetIsCanonical(String),
    #[error("Unknown target `{0}`")]
    UnknownTarget(String),
    #[error("Cutover needs explicit confirmation (--yes)")]
    NotConfirmed,
    #[error("Target `{target}` failed {} health check(s); canonical pointer unchanged", .failures.len())]
    HealthCheckFailed {
        target: String,
        failures: Vec<String>,
    },
}

/// Per-file hashes of a staged target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployManifest {
    pub version: u32,
    pub target: String,
    pub staged_at: DateTime<Utc>,
    /// SHA-256 over the sorted `(path, hash)` list.
    pub digest: String,
    /// Target-relative path → SHA-256 hex.
    pub files: BTreeMap<String, String>,
}

/// Contents of `canonical.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalPointer {
    pub target: String,
    pub digest: String,
    pub switched_at: DateTime<Utc>,
    #[serde(default)]
    pub previous: Option<String>,
}

/// One health check outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    /// `None` when the check passed, otherwise what went wrong.
    pub failure: Option<String>,
}

impl Check {
    fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: None,
        }
    }

    fn fail(name: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: Some(failure.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of [`HostingRoot::verify`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub target: String,
    pub checks: Vec<Check>,
}

impl HealthReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(Check::passed)
    }

    /// `name: reason` for each failing check.
    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter_map(|c| c.failure.as_ref().map(|f| format!("{}: {f}", c.name)))
            .collect()
    }
}

/// A staged deployment as listed by [`HostingRoot::list_targets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSummary {
    pub name: String,
    /// Aggregate digest, `None` when the deploy manifest is unreadable.
    pub digest: Option<String>,
    pub canonical: bool,
}

/// A directory holding hosting targets and the canonical pointer.
#[derive(Debug, Clone)]
pub struct HostingRoot {
    root: PathBuf,
    required_files: Vec<String>,
}

impl HostingRoot {
    pub fn new(root: impl Into<PathBuf>, config: &PublishConfig) -> Self {
        Self {
            root: root.into(),
            required_files: config.required_files.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(POINTER_FILENAME)
    }

    /// Directory of a named target, after validating the name.
    pub fn target_dir(&self, name: &str) -> Result<PathBuf, PublishError> {
        validate_target_name(name)?;
        Ok(self.root.join(TARGETS_DIR).join(name))
    }

    /// Copy a built site into `target` and record its deploy manifest.
    ///
    /// The copy is assembled in `<target>.staging` and swapped in only once
    /// complete. The live target is never restaged.
    pub fn stage(&self, site_dir: &Path, target: &str) -> Result<DeployManifest, PublishError> {
        let target_dir = self.target_dir(target)?;
        if !site_dir.is_dir() || fs::read_dir(site_dir)?.next().is_none() {
            return Err(PublishError::MissingSite(site_dir.to_path_buf()));
        }
        if self.status()?.is_some_and(|p| p.target == target) {
            return Err(PublishError::TargetIsCanonical(target.to_string()));
        }

        let staging = target_dir.with_file_name(format!("{target}{STAGING_SUFFIX}"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        copy_dir_recursive(site_dir, &staging)?;

        let files = hash_tree(&staging)?;
        let manifest = DeployManifest {
            version: MANIFEST_VERSION,
            target: target.to_string(),
            staged_at: Utc::now(),
            digest: aggregate_digest(&files),
            files,
        };
        fs::write(
            staging.join(MANIFEST_FILENAME),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        if target_dir.exists() {
            fs::remove_dir_all(&target_dir)?;
        }
        fs::rename(&staging, &target_dir)?;

        tracing::info!(
            deployment = target,
            files = manifest.files.len(),
            digest = %manifest.digest,
            "staged deployment"
        );
        Ok(manifest)
    }

    /// Run every health check against a staged target.
    ///
    /// Individual check failures are reported, not returned as errors; only
    /// a missing target or an unusable hosting root is an `Err`.
    pub fn verify(&self, target: &str) -> Result<HealthReport, PublishError> {
        let dir = self.target_dir(target)?;
        if !dir.is_dir() {
            return Err(PublishError::UnknownTarget(target.to_string()));
        }

        let mut checks = Vec::new();
        match read_manifest(&dir) {
            Ok(manifest) => {
                checks.push(Check::pass("manifest"));
                checks.push(check_hashes(&dir, &manifest)?);
            }
            Err(e) => checks.push(Check::fail("manifest", e.to_string())),
        }

        for file in &self.required_files {
            let name = format!("required file {file}");
            if dir.join(file).is_file() {
                checks.push(Check::pass(name));
            } else {
                checks.push(Check::fail(name, "missing"));
            }
        }

        checks.push(check_redirects(&dir));

        let report = HealthReport {
            target: target.to_string(),
            checks,
        };
        if report.passed() {
            tracing::info!(deployment = target, "health checks passed");
        } else {
            for failure in report.failures() {
                tracing::warn!(deployment = target, "{failure}");
            }
        }
        Ok(report)
    }

    /// Point the canonical pointer at `target`.
    ///
    /// Requires `confirmed` and a passing [`verify`](Self::verify). On any
    /// failure the previous pointer stays as it was.
    pub fn cutover(&self, target: &str, confirmed: bool) -> Result<CanonicalPointer, PublishError> {
        if !confirmed {
            return Err(PublishError::NotConfirmed);
        }
        let report = self.verify(target)?;
        if !report.passed() {
            return Err(PublishError::HealthCheckFailed {
                target: target.to_string(),
                failures: report.failures(),
            });
        }

        let manifest = read_manifest(&self.target_dir(target)?)?;
        let current = self.status()?;
        let previous = match current {
            Some(p) if p.target == target => p.previous,
            Some(p) => Some(p.target),
            None => None,
        };
        let pointer = CanonicalPointer {
            target: target.to_string(),
            digest: manifest.digest,
            switched_at: Utc::now(),
            previous,
        };
        self.write_pointer(&pointer)?;

        tracing::info!(
            deployment = target,
            previous = pointer.previous.as_deref().unwrap_or("-"),
            "cutover complete"
        );
        Ok(pointer)
    }

    /// The live pointer, `None` before the first cutover.
    pub fn status(&self) -> Result<Option<CanonicalPointer>, PublishError> {
        let path = self.pointer_path();
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
    }

    /// Staged targets sorted by name. In-progress staging dirs are skipped.
    pub fn list_targets(&self) -> Result<Vec<TargetSummary>, PublishError> {
        let dir = self.root.join(TARGETS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let live = self.status()?.map(|p| p.target);

        let mut targets = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !entry.file_type()?.is_dir() || name.ends_with(STAGING_SUFFIX) {
                continue;
            }
            targets.push(TargetSummary {
                digest: read_manifest(&entry.path()).ok().map(|m| m.digest),
                canonical: live.as_deref() == Some(name.as_str()),
                name,
            });
        }
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(targets)
    }

    /// Write-to-temp then rename, so the pointer is replaced in one step.
    fn write_pointer(&self, pointer: &CanonicalPointer) -> Result<(), PublishError> {
        fs::create_dir_all(&self.root)?;
        let tmp = self.root.join(format!("{POINTER_FILENAME}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(pointer)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.pointer_path())?;
        Ok(())
    }
}

fn validate_target_name(name: &str) -> Result<(), PublishError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with(STAGING_SUFFIX)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PublishError::InvalidTarget(name.to_string()))
    }
}

fn read_manifest(dir: &Path) -> Result<DeployManifest, PublishError> {
    let text = fs::read_to_string(dir.join(MANIFEST_FILENAME))?;
    Ok(serde_json::from_str(&text)?)
}

fn check_hashes(dir: &Path, manifest: &DeployManifest) -> Result<Check, PublishError> {
    let actual = hash_tree(dir)?;
    let mut problems = Vec::new();
    for (path, hash) in &manifest.files {
        match actual.get(path) {
            None => problems.push(format!("{path} missing")),
            Some(h) if h != hash => problems.push(format!("{path} changed")),
            Some(_) => {}
        }
    }
    for path in actual.keys().filter(|p| !manifest.files.contains_key(*p)) {
        problems.push(format!("{path} not in manifest"));
    }
    if problems.is_empty() && aggregate_digest(&actual) != manifest.digest {
        problems.push("aggregate digest mismatch".to_string());
    }

    Ok(if problems.is_empty() {
        Check::pass("file hashes")
    } else {
        Check::fail("file hashes", problems.join(", "))
    })
}

/// `_redirects` must load, and each literal site-relative destination must
/// land on content within a few hops.
fn check_redirects(dir: &Path) -> Check {
    const NAME: &str = "redirects";
    let table = match RedirectTable::load(&dir.join("_redirects")) {
        Ok(table) => table,
        Err(e) => return Check::fail(NAME, e.to_string()),
    };
    let router = Router::new(&table, OutputDir::new(dir));

    let mut dangling = Vec::new();
    for rule in table.rules.iter().filter(|r| r.is_literal()) {
        if !rule.destination.starts_with('/') {
            continue;
        }
        if !lands_on_content(&router, &rule.destination) {
            dangling.push(format!("{} → {}", rule.source, rule.destination));
        }
    }
    if dangling.is_empty() {
        Check::pass(NAME)
    } else {
        Check::fail(NAME, format!("destinations not found: {}", dangling.join(", ")))
    }
}

fn lands_on_content(router: &Router<'_, OutputDir>, start: &str) -> bool {
    let mut path = start.to_string();
    for _ in 0..=MAX_REDIRECT_HOPS {
        match router.resolve(&path) {
            Resolution::Content(_) => return true,
            Resolution::NotFound => return false,
            Resolution::Redirect { location, .. } if location.starts_with('/') => path = location,
            // Leaves the site; nothing more to check.
            Resolution::Redirect { .. } => return true,
        }
    }
    false
}

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

/// Hash every file under `dir` except the deploy manifest, in parallel.
fn hash_tree(dir: &Path) -> Result<BTreeMap<String, String>, PublishError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel != MANIFEST_FILENAME {
            files.push((rel, entry.into_path()));
        }
    }

    let hashes = files
        .par_iter()
        .map(|(rel, path)| hash_file(path).map(|hash| (rel.clone(), hash)))
        .collect::<io::Result<BTreeMap<_, _>>>()?;
    Ok(hashes)
}

/// SHA-256 over `path\0hash\n` lines in path order.
pub fn aggregate_digest(files: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, hash) in files {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
