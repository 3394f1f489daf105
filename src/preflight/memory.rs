use crate::preflight::{CheckStatus, PreflightCheck};
use crate::service::LoadedService;

const DEFAULT_BASE_MB: f64 = 50.0;
const DEFAULT_PER_DEPENDENCY_MB: f64 = 2.0;
const DEFAULT_WARN_RATIO: f64 = 1.0;
const DEFAULT_FAIL_RATIO: f64 = 0.8;

const DEFAULT_WARN_COUNT: f64 = 100.0;
const DEFAULT_INFO_COUNT: f64 = 50.0;

/// Compare configured memory against an estimate of base plus per-dependency need.
pub fn analyze_memory(service: &LoadedService) -> PreflightCheck {
    let configured = service.config.service.memory_mb as f64;
    let deps = service.dependency_count.unwrap_or(0);
    let thresholds = service
        .config
        .preflight
        .as_ref()
        .and_then(|p| p.memory.clone())
        .unwrap_or_default();

    let base = thresholds.base_mb.unwrap_or(DEFAULT_BASE_MB);
    let per_dep = thresholds.per_dependency_mb.unwrap_or(DEFAULT_PER_DEPENDENCY_MB);
    let warn_ratio = thresholds.warn_ratio.unwrap_or(DEFAULT_WARN_RATIO);
    let fail_ratio = thresholds.fail_ratio.unwrap_or(DEFAULT_FAIL_RATIO);

    let estimated = base + deps as f64 * per_dep;
    let warn_at = estimated * warn_ratio;
    let fail_at = estimated * fail_ratio;

    if configured < fail_at {
        return PreflightCheck::new(
            "memory-allocation",
            CheckStatus::Fail,
            format!(
                "Configured memory {}MB may be insufficient. Estimated need: {}MB based on {} dependencies",
                configured, estimated, deps
            ),
        )
        .with_values(configured, fail_at.round());
    }

    if configured < warn_at {
        return PreflightCheck::new(
            "memory-allocation",
            CheckStatus::Warn,
            format!(
                "Configured memory {}MB is close to estimated need of {}MB",
                configured, estimated
            ),
        )
        .with_values(configured, warn_at.round());
    }

    PreflightCheck::new(
        "memory-allocation",
        CheckStatus::Pass,
        format!(
            "Configured memory {}MB exceeds estimated need of {}MB",
            configured, estimated
        ),
    )
    .with_values(configured, warn_at.round())
}

/// Classify the dependency count. Only the warn tier changes the status.
pub fn analyze_dependencies(service: &LoadedService) -> PreflightCheck {
    let deps = service.dependency_count.unwrap_or(0);
    let size_mb = service
        .node_modules_size
        .map(|bytes| (bytes as f64 / 1024.0 / 1024.0).round())
        .unwrap_or(0.0);
    let thresholds = service
        .config
        .preflight
        .as_ref()
        .and_then(|p| p.dependencies.clone())
        .unwrap_or_default();
    let warn_count = thresholds.warn_count.unwrap_or(DEFAULT_WARN_COUNT);
    let info_count = thresholds.info_count.unwrap_or(DEFAULT_INFO_COUNT);
    let count = deps as f64;

    if count > warn_count {
        return PreflightCheck::new(
            "dependency-count",
            CheckStatus::Warn,
            format!(
                "High dependency count ({}). node_modules size: {}MB. Consider reducing dependencies for faster cold starts.",
                deps, size_mb
            ),
        )
        .with_values(count, warn_count);
    }

    let tier = if count > info_count { "Moderate" } else { "Low" };
    PreflightCheck::new(
        "dependency-count",
        CheckStatus::Pass,
        format!(
            "{} dependency count ({}). node_modules size: {}MB",
            tier, deps, size_mb
        ),
    )
    .with_values(count, info_count)
}
