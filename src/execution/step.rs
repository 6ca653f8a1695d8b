//! The fixed step set and per-step argv resolution

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use walkdir::WalkDir;

use crate::core::outcome::StepName;
use crate::core::project::Project;
use crate::execution::command::CommandSpec;
use crate::venv::Environment;

/// Default timeout for every step except the test suite, in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 120;

/// Per-worker inputs that shape step commands.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Unique coverage data file for this worker
    pub coverage_file: PathBuf,
    /// Print the coverage report even without requirements
    pub print_cov: bool,
    /// Promote interpreter deprecation warnings to errors in `tests_run`
    pub error_on_warnings: bool,
    /// Extra per-step arguments from the run configuration
    pub step_args: BTreeMap<StepName, Vec<String>>,
}

/// One resolved step, ready to dispatch.
#[derive(Debug, Clone)]
pub struct StepPlan {
    pub name: StepName,
    /// Failure of a required step halts the project's pipeline
    pub required: bool,
    pub timeout: Duration,
    /// Log line emitted when the step starts
    pub description: String,
    pub command: CommandSpec,
}

/// Resolve the active steps for one project, in pipeline order. Steps whose
/// run guard is false are absent from the result.
pub fn build_pipeline(project: &Project, env: &Environment, opts: &StepOptions) -> Vec<StepPlan> {
    let manifest = project.manifest_path.display();
    let default_timeout = Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS);
    let suite_timeout = Duration::from_secs(project.test_suite_timeout);
    let mut steps = Vec::new();

    let mut plan = |name: StepName, required: bool, timeout: Duration, description: String, command: CommandSpec| {
        let command = match opts.step_args.get(&name) {
            Some(extra) => command.args(extra.iter().map(String::as_str)),
            None => command,
        };
        steps.push(StepPlan {
            name,
            required,
            timeout,
            description,
            command: with_step_env(command, opts, name),
        });
    };

    let mut install = CommandSpec::new(env.pip()).args(["-v", "install"]);
    if project.run_pip_update {
        install = install.arg("--upgrade");
    }
    plan(
        StepName::PipInstall,
        true,
        default_timeout,
        format!("Installing {manifest} + deps"),
        install.arg(&project.working_dir).cwd(&project.working_dir),
    );

    if let Some(entry) = project.test_entry_point() {
        plan(
            StepName::TestsRun,
            true,
            suite_timeout,
            format!("Running {} tests via coverage", entry.display()),
            CommandSpec::new(env.tool("coverage"))
                .arg("run")
                .arg(&entry)
                .cwd(&project.working_dir),
        );
    }

    if project.has_coverage_requirements() || opts.print_cov {
        plan(
            StepName::AnalyzeCoverage,
            project.has_coverage_requirements(),
            default_timeout,
            format!("Analyzing coverage report for {manifest}"),
            CommandSpec::new(env.tool("coverage"))
                .args(["report", "-m"])
                .cwd(&project.working_dir),
        );
    }

    if project.run_mypy {
        match project.entry_point_file() {
            Some(entry) => {
                let mut cmd = CommandSpec::new(env.tool("mypy"));
                let mypy_ini = project.working_dir.join("mypy.ini");
                if mypy_ini.is_file() {
                    cmd = cmd.arg("--config").arg(&mypy_ini);
                }
                plan(
                    StepName::MypyRun,
                    false,
                    default_timeout,
                    format!("Running mypy for {manifest}"),
                    cmd.arg(&entry).cwd(&project.working_dir),
                );
            }
            None => debug!("{manifest}: run_mypy set without entry_point_module, skipping"),
        }
    }

    if project.run_black {
        let cmd = CommandSpec::new(env.tool("black"))
            .arg("--check")
            .args(find_py_files(&project.working_dir));
        plan(
            StepName::BlackRun,
            false,
            default_timeout,
            format!("Running black for {manifest}"),
            cmd.cwd(&project.working_dir),
        );
    }

    if project.run_flake8 {
        let mut cmd = CommandSpec::new(env.tool("flake8"));
        let flake8_config = project.working_dir.join(".flake8");
        if flake8_config.is_file() {
            cmd = cmd.arg("--config").arg(&flake8_config);
        }
        plan(
            StepName::Flake8Run,
            false,
            default_timeout,
            format!("Running flake8 for {manifest}"),
            cmd.args(find_py_files(&project.working_dir))
                .cwd(&project.working_dir),
        );
    }

    if project.run_pylint {
        let cmd = CommandSpec::new(env.tool("pylint")).args(find_py_files(&project.working_dir));
        plan(
            StepName::PylintRun,
            false,
            default_timeout,
            format!("Running pylint for {manifest}"),
            cmd.cwd(&project.working_dir),
        );
    }

    if project.run_pyre {
        plan(
            StepName::PyreRun,
            false,
            default_timeout,
            format!("Running pyre for {manifest}"),
            CommandSpec::new(env.tool("pyre"))
                .arg("--source-directory")
                .arg(&project.working_dir)
                .arg("check")
                .cwd(&project.working_dir),
        );
    }

    steps
}

/// Subprocess environment shared by every step: a per-worker coverage data
/// file and a forced UTF-8 stream.
fn with_step_env(cmd: CommandSpec, opts: &StepOptions, name: StepName) -> CommandSpec {
    let mut cmd = cmd
        .env("COVERAGE_FILE", &opts.coverage_file)
        .env("LANG", "en_US.UTF-8")
        .env("LC_ALL", "en_US.UTF-8")
        .env("PYTHONIOENCODING", "utf-8");
    if name == StepName::TestsRun && opts.error_on_warnings {
        cmd = cmd.env("PYTHONWARNINGS", "error::DeprecationWarning");
    }
    cmd
}

/// All `.py` files under `base_dir`, sorted, hidden directories skipped.
pub fn find_py_files(base_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(base_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some("py")
        })
        .map(|entry| entry.into_path())
        .collect()
}
