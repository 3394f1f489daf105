//! Service directory loading.
//!
//! A service is a directory holding `service.yaml`, an entry file and
//! optionally `node_modules`. Loading validates the whole config up front and
//! reports every problem at once.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IgniteError, Result};
use crate::runtime::RuntimeRegistry;

pub const SERVICE_FILE: &str = "service.yaml";

static CONTAINER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]{0,61}[a-z0-9]$|^[a-z0-9]$").expect("valid container name regex")
});

/// Validated `service.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub service: ServiceSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight: Option<PreflightConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSection {
    pub name: String,
    /// Runtime identifier, `name` or `name@version`
    pub runtime: String,
    /// Entry file relative to the service directory
    pub entry: String,
    pub memory_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<f64>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Per-service overrides of preflight thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryThresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<DependencyThresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageThresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutThresholds>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryThresholds {
    pub base_mb: Option<f64>,
    pub per_dependency_mb: Option<f64>,
    pub warn_ratio: Option<f64>,
    pub fail_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyThresholds {
    pub warn_count: Option<f64>,
    pub info_count: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageThresholds {
    pub warn_mb: Option<f64>,
    pub fail_mb: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutThresholds {
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub cold_start_buffer_ms: Option<f64>,
}

/// A service config together with facts gathered from its directory.
#[derive(Debug, Clone)]
pub struct LoadedService {
    pub config: ServiceConfig,
    pub service_path: PathBuf,
    pub entry_path: PathBuf,
    pub has_node_modules: bool,
    /// Total bytes of regular files under `node_modules`
    pub node_modules_size: Option<u64>,
    pub dependency_count: Option<u64>,
}

impl LoadedService {
    pub fn name(&self) -> &str {
        &self.config.service.name
    }

    /// Replace the runtime identifier after checking it against the registry.
    pub fn override_runtime(&mut self, runtime: &str, registry: &RuntimeRegistry) -> Result<()> {
        registry.resolve(runtime)?;
        self.config.service.runtime = runtime.to_string();
        Ok(())
    }
}

/// Permissive shape of `service.yaml` used only for validation.
#[derive(Debug, Deserialize)]
struct RawServiceConfig {
    service: Option<RawServiceSection>,
    #[serde(default)]
    preflight: Option<PreflightConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServiceSection {
    name: Option<String>,
    runtime: Option<String>,
    entry: Option<String>,
    memory_mb: Option<f64>,
    cpu_limit: Option<f64>,
    timeout_ms: Option<f64>,
    #[serde(default)]
    env: Option<BTreeMap<String, serde_yaml::Value>>,
}

/// Check a name against the container naming grammar.
pub fn validate_container_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err("Name contains invalid characters".to_string());
    }
    if !CONTAINER_NAME.is_match(name) {
        return Err("Name must be lowercase alphanumeric with hyphens (1-63 chars)".to_string());
    }
    Ok(())
}

pub fn is_valid_container_name(name: &str) -> bool {
    validate_container_name(name).is_ok()
}

/// True when `relative` names a location inside its base directory.
fn stays_within(relative: &str) -> bool {
    use std::path::Component;

    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::RootDir | Component::Prefix(_) => return false,
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
        }
    }
    // Windows-style separators are not components on Unix.
    !relative.contains('\\')
}

/// Parse and validate `service.yaml` content.
pub fn parse_service_config(content: &str, registry: &RuntimeRegistry) -> Result<ServiceConfig> {
    let raw: RawServiceConfig = serde_yaml::from_str(content)
        .map_err(|e| IgniteError::service(format!("Invalid service.yaml: {}", e)))?;

    let Some(section) = raw.service else {
        return Err(IgniteError::service("Invalid service.yaml: Missing service block"));
    };

    let mut errors = Vec::new();

    let name = section.name.unwrap_or_default();
    if name.is_empty() {
        errors.push("service.name is required".to_string());
    } else if let Err(reason) = validate_container_name(&name) {
        errors.push(format!("service.name invalid: {}", reason));
    }

    let runtime = section.runtime.unwrap_or_default();
    if !registry.is_valid_runtime(&runtime) {
        errors.push(format!(
            "service.runtime must be one of: {}",
            registry.list_supported_runtimes().join(", ")
        ));
    }

    let entry = section.entry.unwrap_or_default();
    if entry.is_empty() {
        errors.push("service.entry is required".to_string());
    } else if !stays_within(&entry) {
        errors.push("service.entry must be a relative path within the service directory".to_string());
    }

    let memory_mb = positive(section.memory_mb, "service.memoryMb", &mut errors);
    let timeout_ms = positive(section.timeout_ms, "service.timeoutMs", &mut errors);
    if let Some(cpu) = section.cpu_limit {
        if cpu <= 0.0 {
            errors.push("service.cpuLimit must be a positive number".to_string());
        }
    }

    let mut env = BTreeMap::new();
    for (key, value) in section.env.unwrap_or_default() {
        match value {
            serde_yaml::Value::String(value) => {
                env.insert(key, value);
            }
            _ => errors.push(format!("service.env.{} must be a string", key)),
        }
    }

    if let Some(preflight) = &raw.preflight {
        validate_preflight(preflight, &mut errors);
    }

    if !errors.is_empty() {
        return Err(IgniteError::service(format!(
            "Invalid service.yaml: {}",
            errors.join(", ")
        )));
    }

    Ok(ServiceConfig {
        service: ServiceSection {
            name,
            runtime,
            entry,
            memory_mb: memory_mb.ceil() as u64,
            cpu_limit: section.cpu_limit,
            timeout_ms: timeout_ms.ceil() as u64,
            env,
        },
        preflight: raw.preflight,
    })
}

fn positive(value: Option<f64>, field: &str, errors: &mut Vec<String>) -> f64 {
    match value {
        Some(v) if v > 0.0 && v.is_finite() => v,
        _ => {
            errors.push(format!("{} must be a positive number", field));
            0.0
        }
    }
}

fn check_positive(fields: &[(&str, Option<f64>)], section: &str, errors: &mut Vec<String>) {
    for (key, value) in fields {
        if let Some(v) = value {
            if !v.is_finite() {
                errors.push(format!("preflight.{}.{} must be a number", section, key));
            } else if *v <= 0.0 {
                errors.push(format!("preflight.{}.{} must be a positive number", section, key));
            }
        }
    }
}

fn validate_preflight(preflight: &PreflightConfig, errors: &mut Vec<String>) {
    if let Some(memory) = &preflight.memory {
        check_positive(
            &[
                ("baseMb", memory.base_mb),
                ("perDependencyMb", memory.per_dependency_mb),
                ("warnRatio", memory.warn_ratio),
                ("failRatio", memory.fail_ratio),
            ],
            "memory",
            errors,
        );
        if let (Some(warn), Some(fail)) = (memory.warn_ratio, memory.fail_ratio) {
            // Fail fires below need * failRatio, so it must be the stricter bound.
            if fail > warn {
                errors.push(
                    "preflight.memory.failRatio must not exceed preflight.memory.warnRatio".to_string(),
                );
            }
        }
    }

    if let Some(deps) = &preflight.dependencies {
        check_positive(
            &[("warnCount", deps.warn_count), ("infoCount", deps.info_count)],
            "dependencies",
            errors,
        );
        if let (Some(warn), Some(info)) = (deps.warn_count, deps.info_count) {
            if info >= warn {
                errors.push(
                    "preflight.dependencies.infoCount must be less than preflight.dependencies.warnCount"
                        .to_string(),
                );
            }
        }
    }

    if let Some(image) = &preflight.image {
        check_positive(
            &[("warnMb", image.warn_mb), ("failMb", image.fail_mb)],
            "image",
            errors,
        );
        if let (Some(warn), Some(fail)) = (image.warn_mb, image.fail_mb) {
            if warn >= fail {
                errors.push("preflight.image.warnMb must be less than preflight.image.failMb".to_string());
            }
        }
    }

    if let Some(timeout) = &preflight.timeout {
        check_positive(
            &[
                ("minMs", timeout.min_ms),
                ("maxMs", timeout.max_ms),
                ("coldStartBufferMs", timeout.cold_start_buffer_ms),
            ],
            "timeout",
            errors,
        );
        if let (Some(min), Some(max)) = (timeout.min_ms, timeout.max_ms) {
            if min >= max {
                errors.push("preflight.timeout.minMs must be less than preflight.timeout.maxMs".to_string());
            }
        }
    }
}

/// Load and validate the service rooted at `path`.
pub async fn load_service(path: impl AsRef<Path>, registry: &RuntimeRegistry) -> Result<LoadedService> {
    let path = path.as_ref();
    let service_path = std::path::absolute(path)
        .map_err(|e| IgniteError::service_io(format!("Cannot resolve {}", path.display()), e))?;
    let config_path = service_path.join(SERVICE_FILE);

    let content = tokio::fs::read_to_string(&config_path).await.map_err(|e| {
        IgniteError::service_io(
            format!("Cannot read service.yaml at {}", config_path.display()),
            e,
        )
    })?;

    let config = parse_service_config(&content, registry)?;

    let entry_path = service_path.join(&config.service.entry);
    if tokio::fs::metadata(&entry_path).await.is_err() {
        return Err(IgniteError::service(format!(
            "Entry file not found: {}",
            entry_path.display()
        )));
    }

    let node_modules = service_path.join("node_modules");
    let has_node_modules = tokio::fs::metadata(&node_modules)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let (node_modules_size, dependency_count) = if has_node_modules {
        (
            Some(directory_size(&node_modules).await?),
            Some(count_dependencies(&node_modules).await?),
        )
    } else {
        (None, None)
    };

    debug!(
        service = %config.service.name,
        path = %service_path.display(),
        dependencies = ?dependency_count,
        "Loaded service"
    );

    Ok(LoadedService {
        config,
        service_path,
        entry_path,
        has_node_modules,
        node_modules_size,
        dependency_count,
    })
}

/// Sum of regular file sizes below `root`. Symlinks are not followed.
async fn directory_size(root: &Path) -> Result<u64> {
    let mut total = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata().await?.len();
            }
        }
    }

    Ok(total)
}

/// Count installed packages: each `@scope/*` entry counts once, dot-dirs are skipped.
async fn count_dependencies(node_modules: &Path) -> Result<u64> {
    let mut count = 0;
    let mut entries = tokio::fs::read_dir(node_modules).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('@') {
            let mut scoped = tokio::fs::read_dir(entry.path()).await?;
            while let Some(inner) = scoped.next_entry().await? {
                if inner.file_type().await?.is_dir() {
                    count += 1;
                }
            }
        } else if !name.starts_with('.') {
            count += 1;
        }
    }

    Ok(count)
}
