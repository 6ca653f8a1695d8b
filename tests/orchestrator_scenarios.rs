//! End-to-end scenarios against a scripted command runner

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::*;
use testherd::cli::output::{format_failures, format_summary};
use testherd::core::outcome::{ProjectStatus, StepName, StepStatus};
use testherd::report;

#[tokio::test]
async fn test_all_pass_two_projects_type_check_only() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(
        &base,
        "first",
        "[ptr]\nentry_point_module = first\nrun_mypy = true\n",
    );
    write_project(
        &base,
        "second",
        "[ptr]\nentry_point_module = second\nrun_mypy = true\n",
    );
    let env = adopted_env(&tmp.path().join("venv")).await;
    let runner = Arc::new(ScriptedRunner::all_ok());
    let (_tx, cancel) = idle_cancel();

    let report_data = run_tree(&base, &env, runner.clone(), default_options(), cancel).await;

    assert_eq!(report_data.passes(), 2);
    assert_eq!(report_data.fails(), 0);
    assert_eq!(report_data.timeouts(), 0);
    assert!(report_data.all_green());
    assert_eq!(report_data.percent_configured(), 100.0);

    let summary = format_summary(&report_data);
    assert!(summary.contains("PASS: 2"));
    assert!(summary.contains("FAIL: 0"));
    assert!(summary.contains("TIMEOUT: 0"));
    assert!(summary.contains("TOTAL: 2"));
    assert!(format_failures(&report_data).is_none());

    // Each project ran install + mypy, nothing else.
    for outcome in &report_data.outcomes {
        let names: Vec<StepName> = outcome.steps.iter().map(|s| s.step).collect();
        assert_eq!(names, vec![StepName::PipInstall, StepName::MypyRun]);
    }

    // The artifact validates and carries one pass entry per suite.
    let stats_path = tmp.path().join("stats.json");
    report::write_stats_file(&stats_path, &report_data);
    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&stats_path).unwrap()).unwrap();
    report::validate_stats(&stats).unwrap();
    let suites = stats["suites"].as_object().unwrap();
    assert_eq!(suites.len(), 2);
    assert!(suites.values().all(|s| s["result"] == "pass"));
}

#[tokio::test]
async fn test_coverage_shortfall_fails_analyze_step() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(
        &base,
        "proj",
        "[ptr]\ntest_suite = tests\nrequired_coverage =\n  lib.py = 99\n  TOTAL = 99\n",
    );
    let env = adopted_env(&tmp.path().join("venv")).await;

    let report_text = "\
Name      Stmts   Miss  Cover   Missing
----------------------------------------
lib.py       50      8    84%   10-17
----------------------------------------
TOTAL        50      8    84%
";
    let runner = Arc::new(ScriptedRunner::new(move |spec| {
        if is_coverage_report(spec) {
            Script::prints(report_text)
        } else {
            Script::ok()
        }
    }));
    let (_tx, cancel) = idle_cancel();

    let report_data = run_tree(&base, &env, runner, default_options(), cancel).await;

    let outcome = &report_data.outcomes[0];
    assert_eq!(
        outcome.status,
        ProjectStatus::Fail {
            step: StepName::AnalyzeCoverage
        }
    );
    let analyze = outcome.failure_output().unwrap();
    assert!(analyze.output.contains("lib.py: 84 < 99 - Missing: 10-17"));
    assert_eq!(outcome.coverage.as_ref().unwrap()["lib.py"], 84.0);

    let stats = report::build_stats(&report_data);
    let suite = stats["suites"].as_object().unwrap().values().next().unwrap();
    assert_eq!(suite["result"], "fail");
    assert_eq!(suite["failed_step"], "analyze_coverage");
}

#[tokio::test]
async fn test_suite_timeout_short_circuits_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(
        &base,
        "slow",
        "[ptr]\ntest_suite = tests\ntest_suite_timeout = 2\nentry_point_module = slow\nrun_mypy = true\n",
    );
    let env = adopted_env(&tmp.path().join("venv")).await;
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        if program_name(spec) == "coverage" {
            Script::TimesOut
        } else {
            Script::ok()
        }
    }));
    let (_tx, cancel) = idle_cancel();

    let report_data = run_tree(&base, &env, runner, default_options(), cancel).await;

    let outcome = &report_data.outcomes[0];
    assert_eq!(
        outcome.status,
        ProjectStatus::Timeout {
            step: StepName::TestsRun
        }
    );
    // The required step's failure halts the pipeline: no mypy afterwards.
    let names: Vec<StepName> = outcome.steps.iter().map(|s| s.step).collect();
    assert_eq!(names, vec![StepName::PipInstall, StepName::TestsRun]);
    assert!(outcome.steps[1].output.contains("Timeout during"));

    let stats = report::build_stats(&report_data);
    let suite = stats["suites"].as_object().unwrap().values().next().unwrap();
    assert_eq!(suite["result"], "timeout");
    assert_eq!(suite["failed_step"], "tests_run");
}

#[tokio::test]
async fn test_mixed_results_report_in_discovery_order() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(&base, "alpha", "[ptr]\ntest_suite = tests\n");
    write_project(
        &base,
        "beta",
        "[ptr]\ntest_suite = tests\nentry_point_module = beta\nrun_mypy = true\n",
    );
    write_project(&base, "gamma", "[ptr]\ntest_suite = tests\n");
    let env = adopted_env(&tmp.path().join("venv")).await;

    let runner = Arc::new(ScriptedRunner::new(|spec| {
        let cwd = spec
            .cwd
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if program_name(spec) == "mypy" && cwd.contains("beta") {
            Script::fails("beta.py:1: error: bad types\n")
        } else if program_name(spec) == "coverage" && cwd.contains("gamma") {
            Script::TimesOut
        } else {
            Script::ok()
        }
    }));
    let (_tx, cancel) = idle_cancel();

    let report_data = run_tree(&base, &env, runner, default_options(), cancel).await;

    assert_eq!(report_data.passes(), 1);
    assert_eq!(report_data.fails(), 1);
    assert_eq!(report_data.timeouts(), 1);
    assert!(!report_data.all_green());

    let summary = format_summary(&report_data);
    assert!(summary.contains("PASS: 1"));
    assert!(summary.contains("FAIL: 1"));
    assert!(summary.contains("TIMEOUT: 1"));
    assert!(summary.contains("TOTAL: 3"));

    // Failure blocks follow discovery order: beta before gamma.
    let failures = format_failures(&report_data).unwrap();
    let beta_at = failures.find("beta").unwrap();
    let gamma_at = failures.find("gamma").unwrap();
    assert!(beta_at < gamma_at);
    assert!(failures.contains("(failed 'mypy_run' step):"));
    assert!(failures.contains("(failed 'tests_run' step):"));
}

#[tokio::test]
async fn test_cancellation_reports_partial_results() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(&base, "a_quick", "[ptr]\ntest_suite = tests\n");
    for name in ["b_stuck", "c_stuck", "d_waiting", "e_waiting"] {
        write_project(
            &base,
            name,
            "[ptr]\ntest_suite = tests\ntest_suite_timeout = 30\n",
        );
    }
    let env = adopted_env(&tmp.path().join("venv")).await;
    let (cancel_tx, cancel_rx) = idle_cancel();

    let runner = Arc::new(
        ScriptedRunner::new(|spec| {
            let cwd = spec
                .cwd
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            if cwd.contains("a_quick") {
                Script::ok()
            } else {
                Script::RunsForever
            }
        })
        .with_cancel(cancel_rx.clone()),
    );

    let handle = {
        let env = Arc::clone(&env);
        let runner: Arc<dyn testherd::CommandRunner> = runner;
        let cancel = cancel_rx.clone();
        let base = base.clone();
        tokio::spawn(async move {
            run_tree(&base, &env, runner, default_options(), cancel).await
        })
    };

    // Let the quick project finish and the stuck ones block, then interrupt.
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel_tx.send(true).unwrap();
    let report_data = handle.await.unwrap();

    assert_eq!(report_data.passes(), 1);
    assert_eq!(report_data.skipped(), 4);
    assert_eq!(report_data.fails(), 0);
    assert_eq!(report_data.total(), 5);
    for outcome in &report_data.outcomes {
        if outcome.project.name() != "a_quick" {
            assert_eq!(outcome.status, ProjectStatus::SkippedCancelled);
        }
    }
    // Skipped projects do not fail the run; cancellation maps to its own
    // exit code at the CLI boundary.
    assert!(report_data.all_green());
}

#[tokio::test]
async fn test_independent_checks_all_run_after_one_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(
        &base,
        "lintfarm",
        "[ptr]\ntest_suite = tests\nentry_point_module = lintfarm\nrun_mypy = true\nrun_black = true\nrun_pyre = true\n",
    );
    let env = adopted_env(&tmp.path().join("venv")).await;
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        if program_name(spec) == "mypy" {
            Script::fails("error: everything is wrong\n")
        } else {
            Script::ok()
        }
    }));
    let (_tx, cancel) = idle_cancel();

    let report_data = run_tree(&base, &env, runner.clone(), default_options(), cancel).await;

    let outcome = &report_data.outcomes[0];
    assert_eq!(
        outcome.status,
        ProjectStatus::Fail {
            step: StepName::MypyRun
        }
    );
    let names: Vec<StepName> = outcome.steps.iter().map(|s| s.step).collect();
    assert_eq!(
        names,
        vec![
            StepName::PipInstall,
            StepName::TestsRun,
            StepName::MypyRun,
            StepName::BlackRun,
            StepName::PyreRun,
        ]
    );
    // The checks after the failing one still ran and passed.
    assert_eq!(outcome.steps[3].status, StepStatus::Pass);
    assert_eq!(outcome.steps[4].status, StepStatus::Pass);
}

#[tokio::test]
async fn test_disabled_projects_skip_unless_forced() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(
        &base,
        "switched_off",
        "[ptr]\ntest_suite = tests\ndisabled = true\n",
    );
    let env = adopted_env(&tmp.path().join("venv")).await;
    let (_tx, cancel) = idle_cancel();

    let runner = Arc::new(ScriptedRunner::all_ok());
    let report_data = run_tree(
        &base,
        &env,
        runner.clone(),
        default_options(),
        cancel.clone(),
    )
    .await;
    let outcome = &report_data.outcomes[0];
    assert_eq!(outcome.status, ProjectStatus::SkippedDisabled);
    assert!(outcome.steps.is_empty());
    assert!(runner.calls().is_empty());
    // Skipped never counts toward the failure decision.
    assert!(report_data.all_green());
    let stats = report::build_stats(&report_data);
    let suite = stats["suites"].as_object().unwrap().values().next().unwrap();
    assert_eq!(suite["result"], "skipped");
    assert_eq!(suite["failed_step"], serde_json::Value::Null);

    // Forcing disabled projects on runs the pipeline.
    let mut options = default_options();
    options.run_disabled = true;
    let forced = Arc::new(ScriptedRunner::all_ok());
    let report_data = run_tree(&base, &env, forced.clone(), options, cancel).await;
    assert_eq!(report_data.passes(), 1);
    assert!(!forced.calls().is_empty());
}

#[tokio::test]
async fn test_adopted_venv_survives_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(&base, "proj", "[ptr]\ntest_suite = tests\n");
    let venv_root = tmp.path().join("venv");

    {
        let env = adopted_env(&venv_root).await;
        let runner = Arc::new(ScriptedRunner::all_ok());
        let (_tx, cancel) = idle_cancel();
        let report_data = run_tree(&base, &env, runner, default_options(), cancel).await;
        assert!(report_data.all_green());
        // env (the only handle) drops here
    }

    assert!(venv_root.exists());
    assert!(venv_root.join("bin").join("python").exists());
}

#[tokio::test]
async fn test_print_cov_runs_analyze_without_requirements() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("repo");
    write_project(&base, "proj", "[ptr]\ntest_suite = tests\n");
    let env = adopted_env(&tmp.path().join("venv")).await;

    let runner = Arc::new(ScriptedRunner::new(|spec| {
        if is_coverage_report(spec) {
            Script::prints("Name\nTOTAL   1   0   100%\n")
        } else {
            Script::ok()
        }
    }));
    let mut options = default_options();
    options.print_cov = true;
    let (_tx, cancel) = idle_cancel();

    let report_data = run_tree(&base, &env, runner.clone(), options, cancel).await;

    let outcome = &report_data.outcomes[0];
    assert!(outcome.status.is_pass());
    let names: Vec<StepName> = outcome.steps.iter().map(|s| s.step).collect();
    assert!(names.contains(&StepName::AnalyzeCoverage));
    // Report-only analyze never enforces, so no per-key coverage is recorded.
    assert!(outcome.coverage.is_none());
}
