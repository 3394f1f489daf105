//! Preflight risk checks run before a service executes.
//!
//! Each check is independent and never errors; problems are expressed as a
//! `warn` or `fail` status on the check itself.

mod image;
mod memory;
mod timeout;

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sandbox::ContainerEngine;
use crate::service::LoadedService;

pub use image::analyze_image;
pub use memory::{analyze_dependencies, analyze_memory};
pub use timeout::analyze_timeout;

/// Ordered so that `max` yields the worst status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "pass"),
            CheckStatus::Warn => write!(f, "warn"),
            CheckStatus::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for CheckValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckValue::Number(n) => write!(f, "{}", n),
            CheckValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for CheckValue {
    fn from(value: f64) -> Self {
        CheckValue::Number(value)
    }
}

impl From<u64> for CheckValue {
    fn from(value: u64) -> Self {
        CheckValue::Number(value as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CheckValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<CheckValue>,
}

impl PreflightCheck {
    pub(crate) fn new(name: &str, status: CheckStatus, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            value: None,
            threshold: None,
        }
    }

    pub(crate) fn with_values(
        mut self,
        value: impl Into<CheckValue>,
        threshold: impl Into<CheckValue>,
    ) -> Self {
        self.value = Some(value.into());
        self.threshold = Some(threshold.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightResult {
    pub service_name: String,
    pub timestamp: String,
    pub checks: Vec<PreflightCheck>,
    pub overall_status: CheckStatus,
}

#[derive(Debug, Clone, Default)]
pub struct PreflightOptions {
    /// Include the image-size check against this image
    pub image_name: Option<String>,
    pub last_execution_ms: Option<u64>,
}

/// Worst status among `checks`; `Pass` when empty.
pub fn overall_status(checks: &[PreflightCheck]) -> CheckStatus {
    checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(CheckStatus::Pass)
}

/// Run memory, dependency, timeout and (optionally) image checks in that order.
pub async fn run_preflight(
    service: &LoadedService,
    engine: &dyn ContainerEngine,
    options: &PreflightOptions,
) -> PreflightResult {
    let mut checks = vec![
        analyze_memory(service),
        analyze_dependencies(service),
        analyze_timeout(service, options.last_execution_ms),
    ];

    if let Some(image_name) = &options.image_name {
        let thresholds = service
            .config
            .preflight
            .as_ref()
            .and_then(|p| p.image.as_ref());
        checks.push(analyze_image(engine, image_name, thresholds).await);
    }

    let overall = overall_status(&checks);
    debug!(service = %service.name(), status = %overall, checks = checks.len(), "Preflight complete");

    PreflightResult {
        service_name: service.name().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        checks,
        overall_status: overall,
    }
}

/// Shared fixtures for the check tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use crate::service::{LoadedService, PreflightConfig, ServiceConfig, ServiceSection};

    pub(crate) fn service(memory_mb: u64, timeout_ms: u64, deps: Option<u64>) -> LoadedService {
        LoadedService {
            config: ServiceConfig {
                service: ServiceSection {
                    name: "hello".to_string(),
                    runtime: "bun".to_string(),
                    entry: "index.ts".to_string(),
                    memory_mb,
                    cpu_limit: None,
                    timeout_ms,
                    env: BTreeMap::new(),
                },
                preflight: None,
            },
            service_path: PathBuf::from("/srv/hello"),
            entry_path: PathBuf::from("/srv/hello/index.ts"),
            has_node_modules: deps.is_some(),
            node_modules_size: deps.map(|d| d * 1024 * 1024),
            dependency_count: deps,
        }
    }

    pub(crate) fn with_preflight(mut service: LoadedService, preflight: PreflightConfig) -> LoadedService {
        service.config.preflight = Some(preflight);
        service
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::sandbox::{BuildRequest, ImageInfo, RunRequest, RunResult};

    struct NoImages;

    #[async_trait]
    impl ContainerEngine for NoImages {
        fn name(&self) -> &str {
            "none"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn build(&self, _request: &BuildRequest) -> Result<()> {
            Ok(())
        }
        async fn run(&self, _request: &RunRequest) -> Result<RunResult> {
            unreachable!("preflight never runs containers")
        }
        async fn inspect_image(&self, _image: &str) -> Option<ImageInfo> {
            None
        }
    }

    fn check(status: CheckStatus) -> PreflightCheck {
        PreflightCheck::new("x", status, String::new())
    }

    #[test]
    fn test_overall_status_is_worst() {
        assert_eq!(overall_status(&[]), CheckStatus::Pass);
        assert_eq!(
            overall_status(&[check(CheckStatus::Pass), check(CheckStatus::Pass)]),
            CheckStatus::Pass
        );
        assert_eq!(
            overall_status(&[check(CheckStatus::Warn), check(CheckStatus::Pass)]),
            CheckStatus::Warn
        );
        assert_eq!(
            overall_status(&[check(CheckStatus::Warn), check(CheckStatus::Fail), check(CheckStatus::Pass)]),
            CheckStatus::Fail
        );
    }

    #[tokio::test]
    async fn test_run_preflight_order_and_aggregate() {
        let service = fixtures::service(128, 5000, Some(10));

        let result = run_preflight(&service, &NoImages, &PreflightOptions::default()).await;
        let names: Vec<&str> = result.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["memory-allocation", "dependency-count", "timeout-config"]);
        assert_eq!(result.overall_status, CheckStatus::Pass);
        assert_eq!(result.service_name, "hello");

        let options = PreflightOptions {
            image_name: Some("ignite-hello:latest".to_string()),
            last_execution_ms: None,
        };
        let result = run_preflight(&service, &NoImages, &options).await;
        assert_eq!(result.checks.len(), 4);
        assert_eq!(result.checks[3].name, "image-size");
        assert_eq!(result.overall_status, CheckStatus::Fail);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = PreflightResult {
            service_name: "hello".to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            checks: vec![check(CheckStatus::Warn).with_values(55u64, 70u64)],
            overall_status: CheckStatus::Warn,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["serviceName"], "hello");
        assert_eq!(json["overallStatus"], "warn");
        assert_eq!(json["checks"][0]["value"], 55.0);
    }
}
