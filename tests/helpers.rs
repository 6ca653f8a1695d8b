//! Test utility functions for testherd integration scenarios

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use testherd::core::outcome::RunReport;
use testherd::execution::{RunOptions, Scheduler};
use testherd::venv::{self, Environment, ProvisionOptions};
use testherd::{discovery, CommandError, CommandOutput, CommandRunner, CommandSpec};

/// What the scripted runner should do for one command.
#[derive(Debug, Clone)]
pub enum Script {
    /// Finish immediately with this exit code and merged output
    Done { code: i32, output: String },
    /// Report a step timeout without actually waiting it out
    TimesOut,
    /// Block until cancelled (or until the step's own deadline)
    RunsForever,
}

impl Script {
    pub fn ok() -> Self {
        Script::Done {
            code: 0,
            output: String::new(),
        }
    }

    pub fn fails(output: &str) -> Self {
        Script::Done {
            code: 1,
            output: output.to_string(),
        }
    }

    pub fn prints(output: &str) -> Self {
        Script::Done {
            code: 0,
            output: output.to_string(),
        }
    }
}

/// CommandRunner whose behavior is decided by a closure over the command.
pub struct ScriptedRunner {
    script: Box<dyn Fn(&CommandSpec) -> Script + Send + Sync>,
    cancel: Option<watch::Receiver<bool>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(script: impl Fn(&CommandSpec) -> Script + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            cancel: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Everything exits 0 with no output.
    pub fn all_ok() -> Self {
        Self::new(|_| Script::ok())
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Display strings of every command run, in dispatch order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        self.calls.lock().expect("calls lock").push(spec.display());
        match (self.script)(spec) {
            Script::Done { code, output } => Ok(CommandOutput {
                exit_code: Some(code),
                output,
                truncated: false,
                duration: Duration::from_millis(1),
            }),
            Script::TimesOut => Err(CommandError::Timeout {
                timeout_secs: timeout.as_secs(),
                partial_output: String::new(),
            }),
            Script::RunsForever => {
                if let Some(mut cancel) = self.cancel.clone() {
                    loop {
                        if *cancel.borrow() {
                            return Err(CommandError::Cancelled);
                        }
                        tokio::select! {
                            changed = cancel.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                            () = tokio::time::sleep(timeout) => {
                                return Err(CommandError::Timeout {
                                    timeout_secs: timeout.as_secs(),
                                    partial_output: String::new(),
                                });
                            }
                        }
                    }
                }
                tokio::time::sleep(timeout).await;
                Err(CommandError::Timeout {
                    timeout_secs: timeout.as_secs(),
                    partial_output: String::new(),
                })
            }
        }
    }
}

/// Tool name a command resolves to: the program's basename.
pub fn program_name(spec: &CommandSpec) -> String {
    Path::new(&spec.program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// True for the `coverage report -m` invocation (as opposed to `coverage run`).
pub fn is_coverage_report(spec: &CommandSpec) -> bool {
    program_name(spec) == "coverage"
        && spec
            .args
            .first()
            .map(|a| a.to_string_lossy() == "report")
            .unwrap_or(false)
}

/// Write a declarative manifest under `base/<name>/setup.cfg`.
pub fn write_project(base: &Path, name: &str, body: &str) -> PathBuf {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir).expect("create project dir");
    std::fs::write(dir.join("setup.cfg"), body).expect("write manifest");
    dir
}

/// An adopted environment over a fake venv tree.
pub async fn adopted_env(root: &Path) -> Arc<Environment> {
    std::fs::create_dir_all(root.join("bin")).expect("create venv bin");
    std::fs::write(root.join("bin").join("python"), "").expect("write python");
    std::fs::write(root.join("bin").join("pip"), "").expect("write pip");

    let runner = ScriptedRunner::new(|spec| {
        panic!("provisioning an adopted venv must not spawn: {}", spec.display())
    });
    let opts = ProvisionOptions {
        adopt: Some(root.to_path_buf()),
        mirror: "https://pypi.org/simple/".to_string(),
        system_site_packages: false,
        packages: vec!["coverage".to_string()],
        timeout: Duration::from_secs(5),
        keep: false,
    };
    Arc::new(venv::provision(&runner, &opts).await.expect("adopt venv"))
}

pub fn default_options() -> RunOptions {
    RunOptions {
        atonce: 2,
        progress_interval: 0.0,
        run_disabled: false,
        print_cov: false,
        error_on_warnings: false,
        step_args: Default::default(),
    }
}

/// Discover `base` and run the scheduler over it.
pub async fn run_tree(
    base: &Path,
    env: &Arc<Environment>,
    runner: Arc<dyn CommandRunner>,
    options: RunOptions,
    cancel: watch::Receiver<bool>,
) -> RunReport {
    let discovered = discovery::discover(base, &[]);
    let started = Instant::now();
    let scheduler = Scheduler::new(runner, options);
    let outcomes = scheduler.run(discovered.projects, Arc::clone(env), cancel).await;
    RunReport {
        outcomes,
        candidate_count: discovered.candidate_count,
        non_configured: discovered.non_configured,
        total_runtime: started.elapsed(),
    }
}

/// A cancel channel that never fires, with its sender kept alive.
pub fn idle_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}
