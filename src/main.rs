use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use testherd::cli::{codes, Cli};
use testherd::core::outcome::RunReport;
use testherd::execution::{RunOptions, Scheduler, TokioCommandRunner};
use testherd::venv::ProvisionOptions;
use testherd::{discovery, report, venv, CommandRunner, RunConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    info!("Starting testherd");
    let code = run(cli).await?;
    std::process::exit(code);
}

fn resolve_base_dir(base_dir: &PathBuf) -> Result<Option<PathBuf>> {
    let resolved = if base_dir.is_absolute() {
        base_dir.clone()
    } else {
        std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join(base_dir)
    };
    if !resolved.exists() {
        error!("{} does not exist. Not running tests", base_dir.display());
        return Ok(None);
    }
    Ok(Some(resolved))
}

async fn run(cli: Cli) -> Result<i32> {
    let Some(base_dir) = resolve_base_dir(&cli.base_dir)? else {
        return Ok(codes::BAD_BASE_DIR);
    };

    let invocation_dir =
        std::env::current_dir().context("Failed to resolve current directory")?;
    let config = RunConfig::load(&invocation_dir);

    let discovered = discovery::discover(&base_dir, &config.exclude_patterns);
    if discovered.projects.is_empty() {
        error!(
            "{} has no test manifests with suites defined. Exiting",
            base_dir.display()
        );
        return Ok(codes::DISCOVERY_EMPTY);
    }
    info!(
        "Discovered {} configured projects out of {} candidates",
        discovered.projects.len(),
        discovered.candidate_count
    );

    // Global cancellation: one interrupt stops new work and tears down
    // in-flight subprocesses.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the run");
            let _ = cancel_tx.send(true);
        }
    });

    let runner: Arc<dyn CommandRunner> =
        Arc::new(TokioCommandRunner::with_cancel(cancel_rx.clone()));

    // One shared environment: baseline packages plus every project's extras.
    let mut packages = config.venv_pkgs.clone();
    for project in &discovered.projects {
        for pkg in &project.venv_pkgs {
            if !packages.contains(pkg) {
                packages.push(pkg.clone());
            }
        }
    }
    let provision_opts = ProvisionOptions {
        adopt: cli.venv.clone(),
        mirror: cli.mirror.clone().unwrap_or_else(|| config.pypi_url.clone()),
        system_site_packages: cli.system_site_packages,
        packages,
        timeout: Duration::from_secs(cli.venv_timeout.unwrap_or(config.venv_timeout)),
        keep: cli.keep_venv,
    };
    let env = match venv::provision(runner.as_ref(), &provision_opts).await {
        Ok(env) => Arc::new(env),
        Err(err) => {
            error!("Unable to provision an environment to run tests in: {err}");
            return Ok(codes::PROVISION_FAILURE);
        }
    };

    let started = Instant::now();
    let options = RunOptions {
        atonce: cli.atonce.unwrap_or(config.atonce),
        progress_interval: cli.progress_interval,
        run_disabled: cli.run_disabled,
        print_cov: cli.print_cov,
        error_on_warnings: cli.error_on_warnings,
        step_args: config.step_args.clone(),
    };
    let scheduler = Scheduler::new(Arc::clone(&runner), options);
    let outcomes = scheduler
        .run(discovered.projects, Arc::clone(&env), cancel_rx.clone())
        .await;

    let run_report = RunReport {
        outcomes,
        candidate_count: discovered.candidate_count,
        non_configured: discovered.non_configured,
        total_runtime: started.elapsed(),
    };

    report::print_report(&run_report, cli.print_non_configured);
    let stats_path = cli.stats_file.clone().unwrap_or_else(report::default_stats_path);
    report::write_stats_file(&stats_path, &run_report);

    // The owned venv is reclaimed here, before the process exits.
    drop(env);

    if *cancel_rx.borrow() {
        return Ok(codes::CANCELLED);
    }
    Ok(if run_report.all_green() {
        codes::SUCCESS
    } else {
        codes::TEST_FAILURES
    })
}
