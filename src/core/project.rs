//! Project domain model

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default timeout for a project's test suite, in seconds.
pub const DEFAULT_SUITE_TIMEOUT_SECS: u64 = 120;

/// One unit of testing: a directory holding a recognized manifest.
///
/// Built once by the manifest loader at discovery time and immutable
/// afterwards. The working directory is always the manifest's parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// Absolute path to the manifest the project was loaded from
    pub manifest_path: PathBuf,

    /// The manifest's parent directory; every step runs with this cwd
    pub working_dir: PathBuf,

    /// Module holding the project's entry point (for the type checker)
    pub entry_point_module: Option<String>,

    /// Dotted module path of the test suite to run under coverage
    pub test_suite: Option<String>,

    /// Timeout for the test suite, in seconds
    pub test_suite_timeout: u64,

    /// Working-dir-relative path (or the literal `TOTAL`) -> minimum percent
    pub required_coverage: BTreeMap<String, f64>,

    pub run_black: bool,
    pub run_mypy: bool,
    pub run_flake8: bool,
    pub run_pylint: bool,
    pub run_pyre: bool,

    /// Accepted for manifest compatibility; no step consumes it
    pub run_usort: bool,

    /// Pass `-U` to the installer so project deps get upgraded in place
    pub run_pip_update: bool,

    /// Skip this project unless the run forces disabled projects on
    pub disabled: bool,

    /// Extra packages folded into the shared environment at provision time
    pub venv_pkgs: Vec<String>,
}

impl Project {
    /// Short display name for logs and heartbeats (the working dir's name).
    pub fn name(&self) -> String {
        self.working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.working_dir.display().to_string())
    }

    /// Whether any coverage requirement is declared.
    pub fn has_coverage_requirements(&self) -> bool {
        !self.required_coverage.is_empty()
    }

    /// Filesystem path of the test suite entry point, e.g. `a.b` -> `a/b.py`.
    pub fn test_entry_point(&self) -> Option<PathBuf> {
        self.test_suite.as_ref().map(|suite| {
            let rel: PathBuf = suite.split('.').collect();
            self.working_dir.join(rel).with_extension("py")
        })
    }

    /// Entry point module file for the type checker.
    pub fn entry_point_file(&self) -> Option<PathBuf> {
        self.entry_point_module
            .as_ref()
            .map(|m| self.working_dir.join(format!("{m}.py")))
    }

    pub fn manifest_dir(manifest_path: &Path) -> PathBuf {
        manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
