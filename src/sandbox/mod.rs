mod docker;
mod traits;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use docker::{build_args, run_args, DockerEngine, TIMEOUT_EXIT_CODE};
pub use traits::ContainerEngine;

/// Sandbox flags applied to a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityFlags {
    pub network_disabled: bool,
    pub read_only_rootfs: bool,
    pub drop_capabilities: bool,
    pub no_new_privileges: bool,
    /// Writable tmpfs mounts, each mounted `rw,noexec,nosuid,size=64m`
    pub tmpfs_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_path: PathBuf,
    pub recipe_path: PathBuf,
    pub image_name: String,
    pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub image_name: String,
    pub container_name: String,
    pub memory_limit_mb: u64,
    /// CPU limit (default: 1)
    pub cpu_limit: Option<f64>,
    pub timeout: Duration,
    pub workdir: String,
    pub volumes: Vec<VolumeMount>,
    pub env: BTreeMap<String, String>,
    pub security: Option<SecurityFlags>,
    pub command: Vec<String>,
}

/// Raw result of one container run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub oom_killed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    /// Size in bytes
    pub size: u64,
    pub created: String,
}
