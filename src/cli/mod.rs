//! Command-line interface

pub mod output;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

/// Process exit codes.
pub mod codes {
    /// Every project passed (skipped projects never count against the run)
    pub const SUCCESS: i32 = 0;

    /// At least one project failed or timed out
    pub const TEST_FAILURES: i32 = 1;

    /// Discovery found no configured projects
    pub const DISCOVERY_EMPTY: i32 = 2;

    /// Environment provisioning failed before any pipeline started
    pub const PROVISION_FAILURE: i32 = 3;

    /// The run was interrupted
    pub const CANCELLED: i32 = 4;

    /// The base directory does not exist
    pub const BAD_BASE_DIR: i32 = 69;
}

/// Repository-wide test orchestrator for Python projects
#[derive(Debug, Parser, Clone)]
#[command(name = "testherd")]
#[command(version)]
#[command(about = "Discovers test manifests, provisions a shared venv and runs QA pipelines", long_about = None)]
pub struct Cli {
    /// How many test suites to run at once
    #[arg(short, long)]
    pub atonce: Option<usize>,

    /// Path to recursively look for test manifests
    #[arg(short, long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Verbose debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Promote deprecation warnings to errors while running test suites
    #[arg(long)]
    pub error_on_warnings: bool,

    /// Do not remove the created venv
    #[arg(short, long)]
    pub keep_venv: bool,

    /// URL for the installer to use for the Simple API
    #[arg(short, long)]
    pub mirror: Option<String>,

    /// Print each project's coverage report even on pass
    #[arg(long)]
    pub print_cov: bool,

    /// Print discovered manifests that carry no tool configuration
    #[arg(long)]
    pub print_non_configured: bool,

    /// Seconds between status updates on the running suites (0 disables)
    #[arg(long, default_value_t = 0.0)]
    pub progress_interval: f64,

    /// Run suites whose manifest marks them disabled
    #[arg(long)]
    pub run_disabled: bool,

    /// JSON statistics file
    #[arg(long)]
    pub stats_file: Option<PathBuf>,

    /// Give the venv access to the system site-packages
    #[arg(long)]
    pub system_site_packages: bool,

    /// Path to an existing venv to reuse
    #[arg(long)]
    pub venv: Option<PathBuf>,

    /// Timeout in seconds for venv creation and installs
    #[arg(long)]
    pub venv_timeout: Option<u64>,
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
