//! Reporter and statistics artifact writer
//!
//! Prints the human-readable summary plus failure blocks, and writes the
//! machine-readable JSON statistics file. The artifact is validated against a
//! strict schema before writing; a validation failure is an internal error
//! that never changes the run's outcome.

use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use serde_json::{json, Map, Value};
use tracing::error;

use crate::cli::output;
use crate::core::outcome::RunReport;

/// Default statistics artifact location.
pub fn default_stats_path() -> PathBuf {
    std::env::temp_dir().join(format!("testherd_stats_{}.json", std::process::id()))
}

/// Strict schema for the statistics artifact: unknown keys are rejected.
pub fn stats_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "required": [
            "total_suites",
            "total_seconds",
            "pass",
            "fail",
            "timeout",
            "percent_suites_configured",
            "suites"
        ],
        "properties": {
            "total_suites": {"type": "integer", "minimum": 0},
            "total_seconds": {"type": "integer", "minimum": 0},
            "pass": {"type": "integer", "minimum": 0},
            "fail": {"type": "integer", "minimum": 0},
            "timeout": {"type": "integer", "minimum": 0},
            "percent_suites_configured": {"type": "number", "minimum": 0, "maximum": 100},
            "suites": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["runtime", "result", "failed_step", "coverage"],
                    "properties": {
                        "runtime": {"type": "integer", "minimum": 0},
                        "result": {"enum": ["pass", "fail", "timeout", "skipped"]},
                        "failed_step": {"type": ["string", "null"]},
                        "coverage": {
                            "type": ["object", "null"],
                            "additionalProperties": {"type": "number"}
                        }
                    }
                }
            }
        }
    })
}

/// Build the artifact value from a run report.
pub fn build_stats(report: &RunReport) -> Value {
    let mut suites = Map::new();
    for outcome in &report.outcomes {
        let coverage = match &outcome.coverage {
            Some(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .collect(),
            ),
            None => Value::Null,
        };
        suites.insert(
            outcome.project.manifest_path.display().to_string(),
            json!({
                "runtime": outcome.runtime.as_secs(),
                "result": outcome.status.stats_result(),
                "failed_step": outcome.status.failed_step().map(|s| s.as_str()),
                "coverage": coverage,
            }),
        );
    }

    json!({
        "total_suites": report.total(),
        "total_seconds": report.total_runtime.as_secs(),
        "pass": report.passes(),
        "fail": report.fails(),
        "timeout": report.timeouts(),
        "percent_suites_configured": report.percent_configured(),
        "suites": suites,
    })
}

/// Validate an artifact value against the schema.
pub fn validate_stats(stats: &Value) -> Result<(), String> {
    let schema = stats_schema();
    let compiled = JSONSchema::compile(&schema)
        .map_err(|err| format!("stats schema failed to compile: {err}"))?;
    let result = compiled.validate(stats);
    if let Err(errors) = result {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }
    Ok(())
}

/// Validate and write the artifact. Neither a validation failure nor an I/O
/// failure changes the run's outcome; both are reported as internal errors.
pub fn write_stats_file(path: &Path, report: &RunReport) {
    let stats = build_stats(report);
    if let Err(err) = validate_stats(&stats) {
        error!("Internal error: stats artifact failed schema validation: {err}");
        return;
    }
    let rendered = match serde_json::to_string_pretty(&stats) {
        Ok(rendered) => rendered,
        Err(err) => {
            error!("Internal error: failed to serialize stats artifact: {err}");
            return;
        }
    };
    if let Err(err) = std::fs::write(path, rendered) {
        error!(
            "Unable to write out JSON statistics file to {} ({err})",
            path.display()
        );
    }
}

/// Emit the summary, failure blocks and optional listings to stdout.
pub fn print_report(report: &RunReport, print_non_configured: bool) {
    println!("{}", output::format_summary(report));
    if print_non_configured {
        if let Some(listing) = output::format_non_configured(report) {
            println!("{listing}");
        }
    }
    if let Some(failures) = output::format_failures(report) {
        println!("{failures}");
    }
}
