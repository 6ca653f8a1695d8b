//! Discovery walker: finds candidate manifests under the base directory

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::manifest::{
    self, ManifestOutcome, DECLARATIVE_MANIFEST, PROGRAMMATIC_MANIFEST,
};
use crate::core::project::Project;

/// Result of one discovery pass.
#[derive(Debug, Default)]
pub struct Discovered {
    /// Valid projects, in deterministic (sorted-path) order
    pub projects: Vec<Project>,
    /// Raw count of candidate directories probed
    pub candidate_count: usize,
    /// Candidate manifests that carried no tool configuration
    pub non_configured: Vec<PathBuf>,
}

fn build_excludes(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => warn!("Ignoring bad exclude pattern `{pattern}`: {err}"),
        }
    }
    builder.build().unwrap_or_else(|err| {
        warn!("Failed to build exclude set: {err}");
        GlobSet::empty()
    })
}

/// Recursively walk `base_dir` and load every candidate manifest.
///
/// Traversal is deterministic (sorted directory entries). Hidden directories
/// and directories matching an exclude pattern are never descended into;
/// symlinked directories are not followed. A directory holding both manifest
/// kinds counts as a single candidate.
pub fn discover(base_dir: &Path, exclude_patterns: &[String]) -> Discovered {
    let excludes = build_excludes(exclude_patterns);

    let walker = WalkDir::new(base_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                return false;
            }
            if excludes.is_match(name.as_ref()) {
                debug!("Skipping {} due to exclude pattern", entry.path().display());
                return false;
            }
            true
        });

    let mut candidate_dirs: BTreeSet<PathBuf> = BTreeSet::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Discovery error: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name == DECLARATIVE_MANIFEST || name == PROGRAMMATIC_MANIFEST {
            if let Some(parent) = entry.path().parent() {
                candidate_dirs.insert(parent.to_path_buf());
            }
        }
    }

    let mut discovered = Discovered {
        candidate_count: candidate_dirs.len(),
        ..Default::default()
    };
    for dir in candidate_dirs {
        match manifest::load_dir(&dir) {
            ManifestOutcome::Project(project) => discovered.projects.push(project),
            ManifestOutcome::NotConfigured(path) => discovered.non_configured.push(path),
            ManifestOutcome::Skipped => {}
        }
    }
    discovered
}
