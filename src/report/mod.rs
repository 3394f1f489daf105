//! Execution reports combining preflight results and run metrics.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::execution::ExecutionMetrics;
use crate::preflight::{CheckStatus, PreflightResult};
use crate::sandbox::TIMEOUT_EXIT_CODE;

/// Cold starts slower than this are reported.
const SLOW_COLD_START_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub level: WarningLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub service_name: String,
    pub timestamp: String,
    pub preflight: PreflightResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionMetrics>,
    pub warnings: Vec<Warning>,
}

pub fn create_report(preflight: PreflightResult, execution: Option<ExecutionMetrics>) -> ExecutionReport {
    let warnings = generate_warnings(&preflight, execution.as_ref());
    ExecutionReport {
        service_name: preflight.service_name.clone(),
        timestamp: Utc::now().to_rfc3339(),
        preflight,
        execution,
        warnings,
    }
}

fn suggestion(check: &str, status: CheckStatus) -> &'static str {
    match (check, status) {
        ("image-size", CheckStatus::Fail) => {
            "Use a smaller base image like node:alpine or consider multi-stage builds"
        }
        ("image-size", _) => "Consider optimizing your image by removing unused files",
        ("memory-allocation", CheckStatus::Fail) => {
            "Increase memoryMb in service.yaml or reduce dependencies"
        }
        ("memory-allocation", _) => "Monitor memory usage during execution and adjust if needed",
        ("dependency-count", CheckStatus::Fail) => {
            "Remove unused dependencies and consider using lighter alternatives"
        }
        ("dependency-count", _) => "Review dependencies for unused packages",
        ("timeout-config", CheckStatus::Fail) => {
            "Increase timeoutMs in service.yaml or optimize function execution time"
        }
        ("timeout-config", _) => "Consider adding buffer time for cold starts",
        _ => "Review configuration",
    }
}

pub fn generate_warnings(preflight: &PreflightResult, execution: Option<&ExecutionMetrics>) -> Vec<Warning> {
    let mut warnings: Vec<Warning> = preflight
        .checks
        .iter()
        .filter_map(|check| {
            let level = match check.status {
                CheckStatus::Pass => return None,
                CheckStatus::Warn => WarningLevel::Warning,
                CheckStatus::Fail => WarningLevel::Critical,
            };
            Some(Warning {
                level,
                message: check.message.clone(),
                suggestion: Some(suggestion(&check.name, check.status).to_string()),
            })
        })
        .collect();

    let Some(execution) = execution else {
        return warnings;
    };

    if let Some(cold_ms) = execution.cold_start_time_ms.filter(|ms| *ms > SLOW_COLD_START_MS) {
        warnings.push(Warning {
            level: WarningLevel::Warning,
            message: format!("Cold start time {}ms is high", cold_ms),
            suggestion: Some("Reduce dependencies or use lighter base images".to_string()),
        });
    }

    if execution.exit_code == TIMEOUT_EXIT_CODE {
        warnings.push(Warning {
            level: WarningLevel::Critical,
            message: "Service was killed after exceeding its timeout".to_string(),
            suggestion: Some("Increase timeoutMs in service.yaml or optimize function execution time".to_string()),
        });
    } else if execution.exit_code != 0 {
        warnings.push(Warning {
            level: WarningLevel::Critical,
            message: format!("Service exited with code {}", execution.exit_code),
            suggestion: Some("Check stderr output for error details".to_string()),
        });
    }

    warnings
}

fn status_icon(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "✓",
        CheckStatus::Warn => "⚠",
        CheckStatus::Fail => "✗",
    }
}

/// Render the preflight section on its own, as `ignite preflight` prints it.
pub fn format_preflight_text(preflight: &PreflightResult) -> String {
    let mut lines = vec![
        String::new(),
        "  PREFLIGHT CHECKS".to_string(),
        format!("  Service: {}", preflight.service_name),
        String::new(),
    ];
    for check in &preflight.checks {
        lines.push(format!("  {} {}: {}", status_icon(check.status), check.name, check.message));
    }
    lines.push(String::new());
    lines.push(format!(
        "  {} Overall Status: {}",
        status_icon(preflight.overall_status),
        preflight.overall_status.to_string().to_uppercase()
    ));
    lines.push(String::new());
    lines.join("\n")
}

pub fn format_report_text(report: &ExecutionReport) -> String {
    let divider = "─".repeat(50);
    let mut lines = vec![
        String::new(),
        "  IGNITE EXECUTION REPORT".to_string(),
        format!("  Service: {}", report.service_name),
        format!("  Time: {}", report.timestamp),
        String::new(),
        divider.clone(),
        String::new(),
        "  PREFLIGHT CHECKS".to_string(),
        String::new(),
    ];

    for check in &report.preflight.checks {
        lines.push(format!("  {} {}: {}", status_icon(check.status), check.name, check.message));
    }
    lines.push(String::new());
    lines.push(divider.clone());

    if let Some(execution) = &report.execution {
        lines.push(String::new());
        lines.push("  EXECUTION METRICS".to_string());
        lines.push(String::new());
        lines.push(format!("  Duration: {}ms", execution.execution_time_ms));
        lines.push(format!("  Memory: {}MB", execution.memory_usage_mb));
        lines.push(format!(
            "  Cold Start: {}",
            if execution.cold_start { "Yes" } else { "No" }
        ));
        if let Some(cold_ms) = execution.cold_start_time_ms {
            lines.push(format!("  Cold Start Time: {}ms", cold_ms));
        }
        lines.push(format!("  Exit Code: {}", execution.exit_code));

        let stdout = execution.stdout.trim();
        if !stdout.is_empty() {
            lines.push(String::new());
            lines.push("  STDOUT:".to_string());
            lines.extend(stdout.lines().map(|l| format!("  {}", l)));
        }
        let stderr = execution.stderr.trim();
        if !stderr.is_empty() {
            lines.push(String::new());
            lines.push("  STDERR:".to_string());
            lines.extend(stderr.lines().map(|l| format!("  {}", l)));
        }

        lines.push(String::new());
        lines.push(divider.clone());
    }

    if !report.warnings.is_empty() {
        lines.push(String::new());
        lines.push("  WARNINGS".to_string());
        lines.push(String::new());
        for warning in &report.warnings {
            let icon = match warning.level {
                WarningLevel::Critical => "✗",
                WarningLevel::Warning => "⚠",
                WarningLevel::Info => "ℹ",
            };
            lines.push(format!("  {} {}", icon, warning.message));
            if let Some(suggestion) = &warning.suggestion {
                lines.push(format!("    → {}", suggestion));
            }
        }
        lines.push(String::new());
        lines.push(divider);
    }

    let overall = report.preflight.overall_status;
    lines.push(String::new());
    lines.push(format!(
        "  {} Overall Status: {}",
        status_icon(overall),
        overall.to_string().to_uppercase()
    ));
    lines.push(String::new());

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::PreflightCheck;

    fn preflight(statuses: &[(&str, CheckStatus)]) -> PreflightResult {
        let checks: Vec<PreflightCheck> = statuses
            .iter()
            .map(|(name, status)| PreflightCheck {
                name: name.to_string(),
                status: *status,
                message: format!("{} is {}", name, status),
                value: None,
                threshold: None,
            })
            .collect();
        PreflightResult {
            service_name: "hello".to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            overall_status: crate::preflight::overall_status(&checks),
            checks,
        }
    }

    fn metrics(exit_code: i32, cold_start_time_ms: Option<u64>) -> ExecutionMetrics {
        ExecutionMetrics {
            execution_time_ms: 900,
            memory_usage_mb: 31.5,
            cold_start: cold_start_time_ms.is_some(),
            cold_start_time_ms,
            exit_code,
            stdout: "result: 42\n".to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_warnings_from_checks() {
        let result = preflight(&[
            ("memory-allocation", CheckStatus::Fail),
            ("dependency-count", CheckStatus::Pass),
            ("timeout-config", CheckStatus::Warn),
        ]);
        let warnings = generate_warnings(&result, None);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].level, WarningLevel::Critical);
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("Increase memoryMb in service.yaml or reduce dependencies")
        );
        assert_eq!(warnings[1].level, WarningLevel::Warning);
        assert_eq!(
            warnings[1].suggestion.as_deref(),
            Some("Consider adding buffer time for cold starts")
        );
    }

    #[test]
    fn test_warnings_from_execution() {
        let result = preflight(&[("timeout-config", CheckStatus::Pass)]);

        assert!(generate_warnings(&result, Some(&metrics(0, Some(100)))).is_empty());

        let warnings = generate_warnings(&result, Some(&metrics(1, Some(900))));
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].message, "Cold start time 900ms is high");
        assert_eq!(warnings[1].message, "Service exited with code 1");

        let warnings = generate_warnings(&result, Some(&metrics(TIMEOUT_EXIT_CODE, None)));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("timeout"));
    }

    #[test]
    fn test_report_text() {
        let result = preflight(&[
            ("memory-allocation", CheckStatus::Pass),
            ("timeout-config", CheckStatus::Warn),
        ]);
        let report = create_report(result, Some(metrics(0, Some(40))));
        assert_eq!(report.service_name, "hello");

        let text = format_report_text(&report);
        assert!(text.contains("  IGNITE EXECUTION REPORT"));
        assert!(text.contains("  ✓ memory-allocation: memory-allocation is pass"));
        assert!(text.contains("  Memory: 31.5MB"));
        assert!(text.contains("  Cold Start Time: 40ms"));
        assert!(text.contains("  STDOUT:\n  result: 42"));
        assert!(text.contains("    → Consider adding buffer time for cold starts"));
        assert!(text.contains("⚠ Overall Status: WARN"));
    }

    #[test]
    fn test_preflight_text() {
        let text = format_preflight_text(&preflight(&[("image-size", CheckStatus::Fail)]));
        assert!(text.contains("  ✗ image-size: image-size is fail"));
        assert!(text.contains("✗ Overall Status: FAIL"));
    }
}
