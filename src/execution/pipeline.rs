//! Per-project pipeline runner
//!
//! Sequences the active steps for one project. Only required-step failures
//! short-circuit; every independent check still runs after another one fails
//! so a single run yields as much diagnostic output as possible. The project
//! is marked failed if any step failed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::outcome::{ProjectOutcome, ProjectStatus, StepName, StepOutcome, StepStatus};
use crate::core::project::Project;
use crate::coverage;
use crate::execution::command::{CommandError, CommandRunner};
use crate::execution::step::{build_pipeline, StepOptions, StepPlan};
use crate::venv::Environment;

/// Runs one project's pipeline at a time. One of these exists per worker.
pub struct PipelineRunner {
    runner: Arc<dyn CommandRunner>,
    env: Arc<Environment>,
    opts: StepOptions,
    run_disabled: bool,
    cancel: watch::Receiver<bool>,
}

impl PipelineRunner {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        env: Arc<Environment>,
        opts: StepOptions,
        run_disabled: bool,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            runner,
            env,
            opts,
            run_disabled,
            cancel,
        }
    }

    pub async fn run_project(&self, project: Arc<Project>) -> ProjectOutcome {
        if project.disabled && !self.run_disabled {
            info!(
                "Not running {} due to disabled being set in its config",
                project.manifest_path.display()
            );
            return ProjectOutcome::skipped(project, ProjectStatus::SkippedDisabled);
        }

        let started = Instant::now();
        let mut plans: VecDeque<StepPlan> =
            build_pipeline(&project, &self.env, &self.opts).into();
        let mut steps: Vec<StepOutcome> = Vec::new();
        let mut first_failure: Option<(StepName, StepStatus)> = None;
        let mut coverage_reported = None;
        let mut cancelled = false;

        while let Some(plan) = plans.pop_front() {
            if cancelled || *self.cancel.borrow() {
                cancelled = true;
                steps.push(StepOutcome::skipped(plan.name));
                continue;
            }

            info!("{}", plan.description);
            let outcome = self.run_step(&project, &plan, &mut coverage_reported).await;

            let status = outcome.status;
            steps.push(outcome);

            match status {
                StepStatus::Pass => {}
                StepStatus::Skipped => {
                    // In-flight subprocess was torn down by cancellation.
                    cancelled = true;
                }
                StepStatus::Fail | StepStatus::Timeout => {
                    debug!("{} FAILED for {}", plan.name, project.manifest_path.display());
                    if first_failure.is_none() {
                        first_failure = Some((plan.name, status));
                    }
                    if plan.required {
                        break;
                    }
                }
            }
        }

        let status = match first_failure {
            Some((step, StepStatus::Timeout)) => ProjectStatus::Timeout { step },
            Some((step, _)) => ProjectStatus::Fail { step },
            None if cancelled => ProjectStatus::SkippedCancelled,
            None => {
                info!(
                    "{} has passed all configured tests",
                    project.manifest_path.display()
                );
                ProjectStatus::Pass
            }
        };

        ProjectOutcome {
            project,
            steps,
            status,
            runtime: started.elapsed(),
            coverage: coverage_reported,
        }
    }

    async fn run_step(
        &self,
        project: &Project,
        plan: &StepPlan,
        coverage_reported: &mut Option<std::collections::BTreeMap<String, f64>>,
    ) -> StepOutcome {
        let started_at = Utc::now();
        match self.runner.run(&plan.command, plan.timeout).await {
            Ok(output) if output.success() => {
                if plan.name == StepName::AnalyzeCoverage {
                    return self.finish_analyze(project, plan, output, started_at, coverage_reported);
                }
                StepOutcome {
                    step: plan.name,
                    status: StepStatus::Pass,
                    exit_code: output.exit_code,
                    output: output.output,
                    started_at,
                    duration: output.duration,
                }
            }
            Ok(output) => StepOutcome {
                step: plan.name,
                status: StepStatus::Fail,
                exit_code: output.exit_code,
                output: output.output,
                started_at,
                duration: output.duration,
            },
            Err(CommandError::Timeout {
                timeout_secs,
                partial_output: _,
            }) => StepOutcome {
                step: plan.name,
                status: StepStatus::Timeout,
                exit_code: None,
                output: format!("Timeout during {}", plan.description),
                started_at,
                duration: std::time::Duration::from_secs(timeout_secs),
            },
            Err(CommandError::Cancelled) => StepOutcome::skipped(plan.name),
            Err(err) => {
                warn!("{} failed to launch: {err}", plan.name);
                StepOutcome {
                    step: plan.name,
                    status: StepStatus::Fail,
                    exit_code: None,
                    output: err.to_string(),
                    started_at,
                    duration: std::time::Duration::ZERO,
                }
            }
        }
    }

    /// The analyze step passes or fails on the report contents, not just the
    /// tool's exit status.
    fn finish_analyze(
        &self,
        project: &Project,
        plan: &StepPlan,
        output: crate::execution::command::CommandOutput,
        started_at: chrono::DateTime<Utc>,
        coverage_reported: &mut Option<std::collections::BTreeMap<String, f64>>,
    ) -> StepOutcome {
        if self.opts.print_cov {
            println!("{}:\n{}", project.manifest_path.display(), output.output);
        }

        if !plan.required {
            // Report-only mode: nothing to enforce.
            return StepOutcome {
                step: plan.name,
                status: StepStatus::Pass,
                exit_code: output.exit_code,
                output: output.output,
                started_at,
                duration: output.duration,
            };
        }

        let check = coverage::analyze(&output.output, project);
        *coverage_reported = Some(check.reported);
        StepOutcome {
            step: plan.name,
            status: if check.passed {
                StepStatus::Pass
            } else {
                StepStatus::Fail
            },
            exit_code: output.exit_code,
            output: if check.passed {
                output.output
            } else {
                check.output
            },
            started_at,
            duration: output.duration,
        }
    }
}
