use crate::preflight::{CheckStatus, PreflightCheck};
use crate::service::LoadedService;

const DEFAULT_MIN_MS: f64 = 100.0;
const DEFAULT_MAX_MS: f64 = 30_000.0;
const DEFAULT_COLD_START_BUFFER_MS: f64 = 500.0;

/// Check the configured timeout against fixed bounds and, when known, the last run.
pub fn analyze_timeout(service: &LoadedService, last_execution_ms: Option<u64>) -> PreflightCheck {
    let configured = service.config.service.timeout_ms as f64;
    let thresholds = service
        .config
        .preflight
        .as_ref()
        .and_then(|p| p.timeout.clone())
        .unwrap_or_default();
    let min = thresholds.min_ms.unwrap_or(DEFAULT_MIN_MS);
    let max = thresholds.max_ms.unwrap_or(DEFAULT_MAX_MS);
    let buffer = thresholds
        .cold_start_buffer_ms
        .unwrap_or(DEFAULT_COLD_START_BUFFER_MS);

    if configured < min {
        return PreflightCheck::new(
            "timeout-config",
            CheckStatus::Fail,
            format!("Timeout {}ms is below minimum {}ms", configured, min),
        )
        .with_values(configured, min);
    }

    if configured > max {
        return PreflightCheck::new(
            "timeout-config",
            CheckStatus::Warn,
            format!(
                "Timeout {}ms exceeds recommended maximum {}ms",
                configured, max
            ),
        )
        .with_values(configured, max);
    }

    if let Some(last) = last_execution_ms {
        let estimated = last as f64 + buffer;
        if configured < estimated {
            return PreflightCheck::new(
                "timeout-config",
                CheckStatus::Warn,
                format!(
                    "Timeout {}ms may be too short. Last execution: {}ms + {}ms cold start buffer = {}ms",
                    configured, last, buffer, estimated
                ),
            )
            .with_values(configured, estimated);
        }
    }

    PreflightCheck::new(
        "timeout-config",
        CheckStatus::Pass,
        format!("Timeout {}ms is within acceptable range", configured),
    )
    .with_values(configured, max)
}
