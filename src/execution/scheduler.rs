//! Bounded parallel scheduler
//!
//! Runs at most N pipeline runners concurrently. Each worker drains a shared
//! queue, running one project to completion before taking the next; results
//! land in discovery-order slots so the final list is stable regardless of
//! completion order. A watch channel carries the global cancel signal:
//! workers stop taking projects and unstarted ones are reported as cancelled.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::outcome::{ProjectOutcome, ProjectStatus, StepName};
use crate::core::project::Project;
use crate::execution::command::CommandRunner;
use crate::execution::pipeline::PipelineRunner;
use crate::execution::step::StepOptions;
use crate::venv::Environment;

/// Run-wide knobs the scheduler and its pipelines consume.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Concurrency cap
    pub atonce: usize,
    /// Heartbeat interval in seconds; zero disables it
    pub progress_interval: f64,
    pub run_disabled: bool,
    pub print_cov: bool,
    pub error_on_warnings: bool,
    pub step_args: BTreeMap<StepName, Vec<String>>,
}

#[derive(Default)]
struct RunStatus {
    pass: AtomicUsize,
    fail: AtomicUsize,
    timeout: AtomicUsize,
    skipped: AtomicUsize,
    running: std::sync::Mutex<BTreeSet<String>>,
}

impl RunStatus {
    fn record(&self, status: &ProjectStatus) {
        let counter = match status {
            ProjectStatus::Pass => &self.pass,
            ProjectStatus::Fail { .. } | ProjectStatus::SetupFailure => &self.fail,
            ProjectStatus::Timeout { .. } => &self.timeout,
            ProjectStatus::SkippedDisabled | ProjectStatus::SkippedCancelled => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn completed(&self) -> usize {
        self.pass.load(Ordering::Relaxed)
            + self.fail.load(Ordering::Relaxed)
            + self.timeout.load(Ordering::Relaxed)
            + self.skipped.load(Ordering::Relaxed)
    }
}

type Queue = Arc<Mutex<VecDeque<(usize, Arc<Project>)>>>;
type Slots = Arc<Mutex<Vec<Option<ProjectOutcome>>>>;

/// Dispatches pipeline runners across a bounded worker pool.
pub struct Scheduler {
    runner: Arc<dyn CommandRunner>,
    options: RunOptions,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn CommandRunner>, options: RunOptions) -> Self {
        Self { runner, options }
    }

    /// Run every project and return outcomes in discovery order.
    pub async fn run(
        &self,
        projects: Vec<Project>,
        env: Arc<Environment>,
        cancel: watch::Receiver<bool>,
    ) -> Vec<ProjectOutcome> {
        let projects: Vec<Arc<Project>> = projects.into_iter().map(Arc::new).collect();
        let total = projects.len();
        if total == 0 {
            return Vec::new();
        }

        let run_id = Uuid::new_v4();
        let queue: Queue = Arc::new(Mutex::new(
            projects
                .iter()
                .enumerate()
                .map(|(idx, p)| (idx, Arc::clone(p)))
                .collect(),
        ));
        let slots: Slots = Arc::new(Mutex::new((0..total).map(|_| None).collect()));
        let status = Arc::new(RunStatus::default());

        let worker_count = self.options.atonce.max(1).min(total);
        debug!("Starting {worker_count} workers for {total} projects (run {run_id})");

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 1..=worker_count {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                run_id,
                Arc::clone(&self.runner),
                Arc::clone(&env),
                self.options.clone(),
                Arc::clone(&queue),
                Arc::clone(&slots),
                Arc::clone(&status),
                cancel.clone(),
            )));
        }

        let heartbeat = if self.options.progress_interval > 0.0 {
            let interval = Duration::from_secs_f64(self.options.progress_interval);
            debug!("Adding progress reporter to report every {interval:?}");
            Some(tokio::spawn(heartbeat_loop(
                interval,
                total,
                Arc::clone(&queue),
                Arc::clone(&status),
            )))
        } else {
            None
        };

        for worker in workers {
            if let Err(err) = worker.await {
                warn!("Worker task failed: {err}");
            }
        }
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }

        let mut slots = slots.lock().await;
        slots
            .iter_mut()
            .enumerate()
            .map(|(idx, slot)| {
                slot.take().unwrap_or_else(|| {
                    ProjectOutcome::skipped(
                        Arc::clone(&projects[idx]),
                        ProjectStatus::SkippedCancelled,
                    )
                })
            })
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    run_id: Uuid,
    runner: Arc<dyn CommandRunner>,
    env: Arc<Environment>,
    options: RunOptions,
    queue: Queue,
    slots: Slots,
    status: Arc<RunStatus>,
    cancel: watch::Receiver<bool>,
) {
    // Unique data file so parallel coverage runs never stomp each other.
    let coverage_file = std::env::temp_dir().join(format!(
        "testherd.{run_id}.{worker_id}.coverage"
    ));
    let step_opts = StepOptions {
        coverage_file: coverage_file.clone(),
        print_cov: options.print_cov,
        error_on_warnings: options.error_on_warnings,
        step_args: options.step_args.clone(),
    };
    let pipeline = PipelineRunner::new(
        runner,
        env,
        step_opts,
        options.run_disabled,
        cancel.clone(),
    );

    loop {
        if *cancel.borrow() {
            debug!("worker {worker_id} stopping on cancel");
            break;
        }
        let next = queue.lock().await.pop_front();
        let Some((idx, project)) = next else {
            debug!("worker {worker_id} exiting");
            break;
        };

        let name = project.name();
        status.running.lock().expect("running set lock").insert(name.clone());

        let outcome = pipeline.run_project(project).await;
        status.record(&outcome.status);
        status.running.lock().expect("running set lock").remove(&name);
        slots.lock().await[idx] = Some(outcome);
    }

    if coverage_file.exists() {
        let _ = std::fs::remove_file(&coverage_file);
    }
}

async fn heartbeat_loop(interval: Duration, total: usize, queue: Queue, status: Arc<RunStatus>) {
    loop {
        tokio::time::sleep(interval).await;
        let queued = queue.lock().await.len();
        let running: Vec<String> = status
            .running
            .lock()
            .expect("running set lock")
            .iter()
            .cloned()
            .collect();
        let done = status.completed();
        let pct = if total > 0 { done * 100 / total } else { 0 };
        info!(
            "{} / {} test suites ran ({}%) - queued {}, running [{}], pass {} fail {} timeout {}",
            done,
            total,
            pct,
            queued,
            running.join(", "),
            status.pass.load(Ordering::Relaxed),
            status.fail.load(Ordering::Relaxed),
            status.timeout.load(Ordering::Relaxed),
        );
    }
}
