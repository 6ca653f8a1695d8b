//! Coverage analyzer: enforces per-file and total thresholds
//!
//! Consumes the text report produced by the coverage tool's `report -m`
//! command. Reported paths are canonicalized before matching so requirements
//! keyed by working-dir-relative paths line up with whatever the tool prints,
//! including Darwin's `/private` prefix on temp directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::core::project::Project;

/// Aggregate row name in the report.
pub const TOTAL_KEY: &str = "TOTAL";

/// One data row of the report, canonicalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub path: PathBuf,
    pub statements: u64,
    pub missed: u64,
    pub cover: f64,
    pub missing: String,
}

/// Result of enforcing a project's requirements against one report.
#[derive(Debug, Clone)]
pub struct CoverageCheck {
    pub passed: bool,
    /// Failure detail; empty when passed
    pub output: String,
    /// Reported percent per required key
    pub reported: BTreeMap<String, f64>,
}

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<name>\S+)\s+(?P<stmts>\d+)\s+(?P<miss>\d+)\s+(?P<cover>\d+(?:\.\d+)?)%\s*(?P<missing>.*)$")
            .expect("coverage line pattern is valid")
    })
}

/// Collapse the Darwin `/private` mount artifact so `/private/var/...`
/// compares equal to `/var/...`.
fn collapse_private(path: PathBuf) -> PathBuf {
    match path.strip_prefix("/private") {
        Ok(rest) => Path::new("/").join(rest),
        Err(_) => path,
    }
}

fn canonicalize(raw: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    };
    collapse_private(absolute)
}

/// Parse the report body into data rows plus the aggregate row.
pub fn parse_report(report: &str, working_dir: &Path) -> (Vec<ReportLine>, Option<ReportLine>) {
    let working_dir = collapse_private(working_dir.to_path_buf());
    let mut lines = Vec::new();
    let mut total = None;

    for raw in report.lines() {
        if raw.is_empty() || raw.starts_with('-') || raw.starts_with("Name") {
            continue;
        }
        let Some(captures) = line_pattern().captures(raw) else {
            debug!("Unparseable coverage report line: {raw}");
            continue;
        };
        let name = &captures["name"];
        let line = ReportLine {
            path: if name == TOTAL_KEY {
                PathBuf::from(TOTAL_KEY)
            } else {
                canonicalize(name, &working_dir)
            },
            statements: captures["stmts"].parse().unwrap_or(0),
            missed: captures["miss"].parse().unwrap_or(0),
            cover: captures["cover"].parse().unwrap_or(0.0),
            missing: captures["missing"].trim().to_string(),
        };
        if name == TOTAL_KEY {
            total = Some(line);
        } else {
            lines.push(line);
        }
    }

    (lines, total)
}

/// Minimal percent rendering: `69` stays integral, `94.5` keeps its fraction.
fn fmt_pct(value: f64) -> String {
    format!("{value}")
}

/// Compare the report against the project's `required_coverage` map.
/// Comparison is `reported >= required` with no tolerance.
pub fn analyze(report: &str, project: &Project) -> CoverageCheck {
    let (lines, total) = parse_report(report, &project.working_dir);
    let mut reported = BTreeMap::new();
    let mut missing = String::new();
    let mut shortfalls = String::new();

    for (key, required) in &project.required_coverage {
        let found = if key == TOTAL_KEY {
            total.as_ref()
        } else {
            lines.iter().find(|line| line.path.ends_with(key))
        };

        let Some(line) = found else {
            missing.push_str(&format!(
                "{key} has not reported any coverage. Does the file exist? \
                 Does it get ran during tests? Remove from setup config.\n"
            ));
            continue;
        };

        reported.insert(key.clone(), line.cover);
        if line.cover < *required {
            shortfalls.push_str(&format!(
                "  {}: {} < {} - Missing: {}\n",
                key,
                fmt_pct(line.cover),
                fmt_pct(*required),
                line.missing
            ));
        }
    }

    let mut output = missing;
    if !shortfalls.is_empty() {
        output.push_str("The following files did not meet coverage requirements:\n");
        output.push_str(&shortfalls);
    }

    CoverageCheck {
        passed: output.is_empty(),
        output,
        reported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REPORT: &str = "\
Name                                Stmts   Miss  Cover   Missing
------------------------------------------------------------------
unittest/ptr.py                        59     14    69%   70-72, 76-94, 98
unittest/ptr_tests.py                  24      0   100%
------------------------------------------------------------------
TOTAL                                  84     14    99%
";

    const SAMPLE_FLOAT_REPORT: &str = "\
Name                                Stmts   Miss  Cover   Missing
------------------------------------------------------------------
unittest/ptr.py                        59     14     69.00%   70-72, 76-94, 98
------------------------------------------------------------------
TOTAL                                  59     14     69.00%
";

    fn project_with(requirements: &[(&str, f64)]) -> Project {
        Project {
            manifest_path: PathBuf::from("/repo/proj/setup.cfg"),
            working_dir: PathBuf::from("/repo/proj"),
            entry_point_module: None,
            test_suite: Some("unittest.ptr_tests".to_string()),
            test_suite_timeout: 120,
            required_coverage: requirements
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            run_black: false,
            run_mypy: false,
            run_flake8: false,
            run_pylint: false,
            run_pyre: false,
            run_usort: false,
            run_pip_update: false,
            disabled: false,
            venv_pkgs: Vec::new(),
        }
    }

    #[test]
    fn test_parse_report_rows_and_total() {
        let (lines, total) = parse_report(SAMPLE_REPORT, Path::new("/repo/proj"));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].path, PathBuf::from("/repo/proj/unittest/ptr.py"));
        assert_eq!(lines[0].cover, 69.0);
        assert_eq!(lines[0].missing, "70-72, 76-94, 98");
        assert_eq!(total.unwrap().cover, 99.0);
    }

    #[test]
    fn test_shortfall_lists_each_file() {
        let project = project_with(&[("unittest/ptr.py", 99.0), ("TOTAL", 99.0)]);
        let check = analyze(SAMPLE_REPORT, &project);
        assert!(!check.passed);
        assert!(check
            .output
            .starts_with("The following files did not meet coverage requirements:"));
        assert!(check
            .output
            .contains("unittest/ptr.py: 69 < 99 - Missing: 70-72, 76-94, 98"));
        assert_eq!(check.reported["unittest/ptr.py"], 69.0);
        assert_eq!(check.reported["TOTAL"], 99.0);
    }

    #[test]
    fn test_requirements_met_passes() {
        let project = project_with(&[("unittest/ptr.py", 69.0), ("TOTAL", 99.0)]);
        let check = analyze(SAMPLE_REPORT, &project);
        assert!(check.passed);
        assert!(check.output.is_empty());
    }

    #[test]
    fn test_exact_threshold_passes_and_hair_below_fails() {
        let project = project_with(&[("unittest/ptr.py", 69.0)]);
        assert!(analyze(SAMPLE_FLOAT_REPORT, &project).passed);

        let strict = project_with(&[("unittest/ptr.py", 69.001)]);
        assert!(!analyze(SAMPLE_FLOAT_REPORT, &strict).passed);
    }

    #[test]
    fn test_missing_file_is_a_failure_with_guidance() {
        let project = project_with(&[("fake_file.py", 50.0)]);
        let check = analyze(SAMPLE_REPORT, &project);
        assert!(!check.passed);
        assert!(check
            .output
            .starts_with("fake_file.py has not reported any coverage."));
    }

    #[test]
    fn test_missing_file_does_not_swallow_other_shortfalls() {
        let project = project_with(&[("fake_file.py", 50.0), ("unittest/ptr.py", 90.0)]);
        let check = analyze(SAMPLE_REPORT, &project);
        assert!(!check.passed);
        // Every requirement is evaluated: the absent file's guidance and the
        // present file's shortfall both appear in one combined failure.
        assert!(check
            .output
            .contains("fake_file.py has not reported any coverage."));
        assert!(check
            .output
            .contains("unittest/ptr.py: 69 < 90 - Missing: 70-72, 76-94, 98"));
        assert_eq!(check.reported["unittest/ptr.py"], 69.0);
        assert!(!check.reported.contains_key("fake_file.py"));
    }

    #[test]
    fn test_darwin_private_prefix_collapses() {
        let report = "\
Name                     Stmts   Miss  Cover   Missing
-------------------------------------------------------
/private/var/work/x.py      10      1    90%   12
-------------------------------------------------------
TOTAL                       10      1    90%
";
        let mut project = project_with(&[("x.py", 80.0)]);
        project.working_dir = PathBuf::from("/var/work");
        let check = analyze(report, &project);
        assert!(check.passed);
        assert_eq!(check.reported["x.py"], 90.0);
    }

    #[test]
    fn test_suffix_match_resolves_relative_requirements() {
        let (lines, _) = parse_report(SAMPLE_REPORT, Path::new("/private/var/repo"));
        // Both the row and the working dir collapse to /var.
        assert_eq!(
            lines[0].path,
            PathBuf::from("/var/repo/unittest/ptr.py")
        );
        assert!(lines[0].path.ends_with("unittest/ptr.py"));
    }
}
