use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::runtime::{INIT_TIME_MARKER, MEMORY_MARKER};
use crate::sandbox::RunResult;

/// Cold start time assumed when the entrypoint never reported one.
const COLD_START_FALLBACK_MS: u64 = 200;

static INIT_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IGNITE_INIT_TIME:(\d+)").expect("valid init marker regex"));
static MEMORY_MB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IGNITE_MEMORY_MB:(\d+(?:\.\d+)?)").expect("valid memory marker regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub execution_time_ms: u64,
    pub memory_usage_mb: f64,
    pub cold_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_start_time_ms: Option<u64>,
    pub exit_code: i32,
    pub stdout: String,
    /// Stderr with instrumentation marker lines removed
    pub stderr: String,
}

/// Normalize a raw run result. Marker lines are consumed from stderr.
pub fn parse_metrics(result: &RunResult, cold_start: bool) -> ExecutionMetrics {
    let cold_start_time_ms = cold_start.then(|| {
        marker_line(&result.stderr, INIT_TIME_MARKER)
            .and_then(|line| INIT_TIME.captures(line))
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or_else(|| result.duration_ms.min(COLD_START_FALLBACK_MS))
    });

    let memory_usage_mb = marker_line(&result.stderr, MEMORY_MARKER)
        .and_then(|line| MEMORY_MB.captures(line))
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0.0);

    ExecutionMetrics {
        execution_time_ms: result.duration_ms,
        memory_usage_mb,
        cold_start,
        cold_start_time_ms,
        exit_code: result.exit_code,
        stdout: result.stdout.clone(),
        stderr: clean_stderr(&result.stderr),
    }
}

fn marker_line<'a>(stderr: &'a str, marker: &str) -> Option<&'a str> {
    stderr.lines().find(|line| line.contains(marker))
}

fn clean_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !line.contains(INIT_TIME_MARKER) && !line.contains(MEMORY_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
