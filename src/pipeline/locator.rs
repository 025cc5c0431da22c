//! Locator parsing and collision-free artifact naming.
//!
//! Several runs may share one scratch directory, so every artifact name
//! combines three discriminators:
//!
//! ```text
//! vqa_<unix-nanos>_<run-id>_img<index>_<sanitised-basename>
//! ```
//!
//! The nanosecond timestamp and the random run id separate runs; the index
//! separates locators inside a run (two locators may share a basename). The
//! basename keeps names recognisable in a directory listing but is reduced
//! to `[A-Za-z0-9._-]` so a hostile URL cannot escape the scratch directory.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const MAX_BASENAME_LEN: usize = 64;
const FALLBACK_BASENAME: &str = "image";

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Split a delimited locator list into trimmed, non-empty entries, in order.
pub fn parse_locators(input: &str, separator: char) -> Vec<String> {
    input
        .split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reduce `raw` to a filesystem-safe path component.
///
/// Unsafe runs collapse to a single `_`; leading dots are removed so the
/// result can never be `.`, `..`, or a hidden file.
pub fn sanitize_component(raw: &str) -> String {
    let replaced = RE_UNSAFE.replace_all(raw, "_");
    let trimmed = replaced.trim_start_matches(['.', '_']);
    let mut out: String = trimmed.chars().take(MAX_BASENAME_LEN).collect();
    while out.ends_with('.') {
        out.pop();
    }
    if out.is_empty() {
        FALLBACK_BASENAME.to_string()
    } else {
        out
    }
}

/// Best-effort basename for a locator: the last non-empty URL path segment.
fn locator_basename(locator: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(locator) {
        if let Some(segments) = parsed.path_segments() {
            if let Some(last) = segments.filter(|s| !s.is_empty()).next_back() {
                return last.to_string();
            }
        }
        return FALLBACK_BASENAME.to_string();
    }
    locator
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(FALLBACK_BASENAME)
        .to_string()
}

/// Produces unique artifact paths for one run.
#[derive(Debug, Clone)]
pub struct ArtifactNamer {
    scratch_dir: PathBuf,
    prefix: String,
}

impl ArtifactNamer {
    /// Create a namer for a fresh run in `scratch_dir`.
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let run_id = Uuid::new_v4().simple().to_string();
        Self {
            scratch_dir: scratch_dir.into(),
            prefix: format!("vqa_{}_{}", nanos, &run_id[..12]),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Destination for the download of the `index`-th locator.
    pub fn download_path(&self, index: usize, locator: &str) -> PathBuf {
        let base = sanitize_component(&locator_basename(locator));
        self.scratch_dir
            .join(format!("{}_img{}_{}", self.prefix, index, base))
    }
}
