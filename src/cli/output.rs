//! CLI output formatting

use console::{style, Emoji};

use crate::core::outcome::RunReport;

// Emojis for the summary block
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "");
pub static HOURGLASS: Emoji<'_, '_> = Emoji("⌛️ ", "");
pub static TOTAL: Emoji<'_, '_> = Emoji("💩 ", "");

/// The run summary block: counts, wall clock and configured percentage.
pub fn format_summary(report: &RunReport) -> String {
    let mut out = format!(
        "-- Summary (total time {}s):\n\n",
        report.total_runtime.as_secs()
    );
    out.push_str(&format!("{}PASS: {}\n", CHECK, report.passes()));
    out.push_str(&format!("{}FAIL: {}\n", CROSS, report.fails()));
    out.push_str(&format!("{}TIMEOUT: {}\n", HOURGLASS, report.timeouts()));
    out.push_str(&format!("{}TOTAL: {}\n", TOTAL, report.total()));
    out.push_str(&format!(
        "\n-- {} / {} ({:.0}%) manifests have tests configured\n",
        report.total(),
        report.candidate_count,
        report.percent_configured()
    ));
    out
}

/// Captured output of every non-passing project, in discovery order, one
/// block per failing step.
pub fn format_failures(report: &RunReport) -> Option<String> {
    use crate::core::outcome::StepStatus;

    let mut blocks = String::new();
    for outcome in &report.outcomes {
        if outcome.status.failed_step().is_none() {
            continue;
        }
        for step in &outcome.steps {
            if !matches!(step.status, StepStatus::Fail | StepStatus::Timeout) {
                continue;
            }
            let header = format!(
                "{} (failed '{}' step):",
                outcome.project.manifest_path.display(),
                step.step
            );
            blocks.push_str(&format!("{}\n{}\n", style(header).bold(), step.output));
        }
    }

    if blocks.is_empty() {
        None
    } else {
        Some(format!("-- Failure Output --\n\n{blocks}"))
    }
}

/// Candidate manifests that carried no tool configuration.
pub fn format_non_configured(report: &RunReport) -> Option<String> {
    if report.non_configured.is_empty() {
        return None;
    }
    let mut out = String::from("-- Non-configured manifests:\n");
    for path in &report.non_configured {
        out.push_str(&format!("  {}\n", path.display()));
    }
    Some(out)
}
