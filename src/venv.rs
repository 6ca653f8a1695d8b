//! Shared environment provisioning
//!
//! One isolated interpreter environment serves every project in the run. It
//! is either created fresh under the system temp dir (and deleted again on
//! every exit path unless kept) or adopted from the user, in which case it is
//! never touched on the way out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::execution::command::{CommandError, CommandRunner, CommandSpec};

/// Interpreter used to create fresh environments.
pub const SYSTEM_PYTHON: &str = "python3";

/// pip network timeout written into the environment's pip.conf.
const PIP_NET_TIMEOUT_SECS: u32 = 2;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("venv {} does not exist or is missing an interpreter/installer", .0.display())]
    InvalidAdoptPath(PathBuf),

    #[error("failed to create venv at {}: {reason}", .path.display())]
    Create { path: PathBuf, reason: String },

    #[error("failed to install packages into {}: {reason}", .path.display())]
    Install { path: PathBuf, reason: String },

    #[error("environment provisioning timed out after {0}s")]
    Timeout(u64),

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Inputs to `provision`.
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Existing environment to adopt instead of creating one
    pub adopt: Option<PathBuf>,
    /// Index URL for the installer
    pub mirror: String,
    pub system_site_packages: bool,
    /// Baseline packages plus every project's extra packages
    pub packages: Vec<String>,
    pub timeout: Duration,
    /// Do not delete the owned environment at run end
    pub keep: bool,
}

/// Handle to the shared interpreter environment.
#[derive(Debug)]
pub struct Environment {
    root: PathBuf,
    owned: bool,
    keep: bool,
}

impl Environment {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn owned(&self) -> bool {
        self.owned
    }

    /// Path of a tool inside the environment, e.g. `bin/mypy`.
    pub fn tool(&self, name: &str) -> PathBuf {
        self.root.join("bin").join(name)
    }

    pub fn python(&self) -> PathBuf {
        self.tool("python")
    }

    pub fn pip(&self) -> PathBuf {
        self.tool("pip")
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if self.keep {
            info!("Not removing venv @ {} due to CLI arguments", self.root.display());
            return;
        }
        if self.root.exists() {
            match std::fs::remove_dir_all(&self.root) {
                Ok(()) => info!("Removed venv @ {}", self.root.display()),
                Err(err) => warn!("Failed to remove venv @ {}: {}", self.root.display(), err),
            }
        }
    }
}

/// Create or adopt the run's environment. Runs to completion before any
/// pipeline starts; any failure here aborts the run.
pub async fn provision(
    runner: &dyn CommandRunner,
    opts: &ProvisionOptions,
) -> Result<Environment, ProvisionError> {
    if let Some(path) = &opts.adopt {
        return adopt(path);
    }

    let root = std::env::temp_dir().join(format!("testherd_venv_{}", std::process::id()));
    info!("Creating venv @ {}", root.display());

    // Constructed before the first subprocess so every failure path below
    // reclaims a partially built root on drop.
    let env = Environment {
        root: root.clone(),
        owned: true,
        keep: opts.keep,
    };

    let mut create = CommandSpec::new(SYSTEM_PYTHON).args(["-m", "venv"]);
    if opts.system_site_packages {
        create = create.arg("--system-site-packages");
    }
    create = create.arg(&root);
    run_provision_step(runner, &create, opts.timeout, &root, false).await?;

    write_pip_conf(&root, &opts.mirror)?;

    if !opts.packages.is_empty() {
        let install = CommandSpec::new(env.pip())
            .args(["install", "--upgrade"])
            .args(opts.packages.iter().map(String::as_str));
        run_provision_step(runner, &install, opts.timeout, &root, true).await?;
    }

    info!("Successfully created venv @ {} to run tests", root.display());
    Ok(env)
}

fn adopt(path: &Path) -> Result<Environment, ProvisionError> {
    let candidate = Environment {
        root: path.to_path_buf(),
        owned: false,
        keep: true,
    };
    if !path.is_dir() || !candidate.python().is_file() || !candidate.pip().is_file() {
        return Err(ProvisionError::InvalidAdoptPath(path.to_path_buf()));
    }
    info!("Reusing existing venv @ {}", path.display());
    Ok(candidate)
}

async fn run_provision_step(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    timeout: Duration,
    root: &Path,
    installing: bool,
) -> Result<(), ProvisionError> {
    let outcome = runner.run(spec, timeout).await;
    let failure = |reason: String| {
        if installing {
            ProvisionError::Install {
                path: root.to_path_buf(),
                reason,
            }
        } else {
            ProvisionError::Create {
                path: root.to_path_buf(),
                reason,
            }
        }
    };

    match outcome {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => Err(failure(format!(
            "`{}` exited with {:?}: {}",
            spec.display(),
            output.exit_code,
            output.output.trim()
        ))),
        Err(CommandError::Timeout { timeout_secs, .. }) => {
            Err(ProvisionError::Timeout(timeout_secs))
        }
        Err(err) => Err(failure(err.to_string())),
    }
}

fn write_pip_conf(root: &Path, mirror: &str) -> Result<(), ProvisionError> {
    let path = root.join("pip.conf");
    let contents = format!(
        "[global]\nindex-url = {mirror}\ntimeout = {PIP_NET_TIMEOUT_SECS}\n"
    );
    std::fs::write(&path, contents).map_err(|source| ProvisionError::Io { path, source })
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::Environment;
    use std::path::Path;

    /// Adopted handle over an arbitrary directory, for unit tests.
    pub(crate) fn adopted(root: &Path) -> Environment {
        Environment {
            root: root.to_path_buf(),
            owned: false,
            keep: true,
        }
    }
}
