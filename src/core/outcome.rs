//! Execution outcome models

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::project::Project;

/// The fixed, ordered set of pipeline steps. Names are contractual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    PipInstall,
    TestsRun,
    AnalyzeCoverage,
    MypyRun,
    BlackRun,
    Flake8Run,
    PylintRun,
    PyreRun,
}

impl StepName {
    /// Every step, in pipeline order.
    pub const ALL: [StepName; 8] = [
        StepName::PipInstall,
        StepName::TestsRun,
        StepName::AnalyzeCoverage,
        StepName::MypyRun,
        StepName::BlackRun,
        StepName::Flake8Run,
        StepName::PylintRun,
        StepName::PyreRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::PipInstall => "pip_install",
            StepName::TestsRun => "tests_run",
            StepName::AnalyzeCoverage => "analyze_coverage",
            StepName::MypyRun => "mypy_run",
            StepName::BlackRun => "black_run",
            StepName::Flake8Run => "flake8_run",
            StepName::PylintRun => "pylint_run",
            StepName::PyreRun => "pyre_run",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single step finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pass,
    Fail,
    Timeout,
    /// Reached but never run (pipeline cancelled mid-flight)
    Skipped,
}

/// Result of running one step for one project.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: StepName,
    pub status: StepStatus,
    /// Exit code when the child ran to completion
    pub exit_code: Option<i32>,
    /// Merged stdout + stderr, bounded by the capture cap
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl StepOutcome {
    /// A step that was reached but not executed.
    pub fn skipped(step: StepName) -> Self {
        Self {
            step,
            status: StepStatus::Skipped,
            exit_code: None,
            output: String::new(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }
}

/// Terminal classification of one project's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    Pass,
    /// A step exited nonzero; `step` is the first one that did
    Fail { step: StepName },
    /// A step exceeded its deadline; `step` is the first one that did
    Timeout { step: StepName },
    SkippedDisabled,
    SkippedCancelled,
    SetupFailure,
}

impl ProjectStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, ProjectStatus::Pass)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            ProjectStatus::SkippedDisabled | ProjectStatus::SkippedCancelled
        )
    }

    /// The step the stats artifact blames, if any.
    pub fn failed_step(&self) -> Option<StepName> {
        match self {
            ProjectStatus::Fail { step } | ProjectStatus::Timeout { step } => Some(*step),
            _ => None,
        }
    }

    /// The `result` value in the stats artifact.
    pub fn stats_result(&self) -> &'static str {
        match self {
            ProjectStatus::Pass => "pass",
            ProjectStatus::Fail { .. } | ProjectStatus::SetupFailure => "fail",
            ProjectStatus::Timeout { .. } => "timeout",
            ProjectStatus::SkippedDisabled | ProjectStatus::SkippedCancelled => "skipped",
        }
    }
}

/// Everything that happened to one project during the run.
#[derive(Debug, Clone)]
pub struct ProjectOutcome {
    pub project: Arc<Project>,
    /// Step outcomes in pipeline order, one per step that was dispatched
    pub steps: Vec<StepOutcome>,
    pub status: ProjectStatus,
    pub runtime: Duration,
    /// Reported percent per required-coverage key, when the analyzer ran
    pub coverage: Option<BTreeMap<String, f64>>,
}

impl ProjectOutcome {
    pub fn skipped(project: Arc<Project>, status: ProjectStatus) -> Self {
        Self {
            project,
            steps: Vec::new(),
            status,
            runtime: Duration::ZERO,
            coverage: None,
        }
    }

    /// Output of the first failing step, for the failure report.
    pub fn failure_output(&self) -> Option<&StepOutcome> {
        let failed = self.status.failed_step()?;
        self.steps.iter().find(|s| s.step == failed)
    }
}

/// Aggregated result of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Project outcomes in discovery order
    pub outcomes: Vec<ProjectOutcome>,
    /// Raw count of candidate manifests the walker probed
    pub candidate_count: usize,
    /// Candidate manifests that did not yield a project
    pub non_configured: Vec<PathBuf>,
    /// Wall clock for the whole run
    pub total_runtime: Duration,
}

impl RunReport {
    pub fn passes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_pass()).count()
    }

    pub fn fails(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.status,
                    ProjectStatus::Fail { .. } | ProjectStatus::SetupFailure
                )
            })
            .count()
    }

    pub fn timeouts(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ProjectStatus::Timeout { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_skipped()).count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Percentage of discovered candidates that are configured for the tool.
    pub fn percent_configured(&self) -> f64 {
        if self.candidate_count == 0 {
            return 0.0;
        }
        (self.total() as f64 / self.candidate_count as f64) * 100.0
    }

    /// Exit-code decision: skipped projects never count against the run.
    pub fn all_green(&self) -> bool {
        self.fails() == 0 && self.timeouts() == 0
    }
}
