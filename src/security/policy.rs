use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IgniteError, Result};
use crate::sandbox::SecurityFlags;

/// Candidate policy files, first match wins.
pub const POLICY_FILES: [&str; 4] = [
    "ignite.policy.yaml",
    "ignite.policy.yml",
    ".ignite-policy.yaml",
    ".ignite-policy.yml",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    pub network: NetworkPolicy,
    pub filesystem: FilesystemPolicy,
    pub process: ProcessPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_ports: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemPolicy {
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_write_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_read_paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPolicy {
    pub allow_spawn: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,
}

impl Default for SecurityPolicy {
    /// No network, read-only filesystem with `/tmp` writable, no spawning.
    fn default() -> Self {
        Self {
            network: NetworkPolicy::default(),
            filesystem: FilesystemPolicy {
                read_only: true,
                allowed_write_paths: Some(vec!["/tmp".to_string()]),
                blocked_read_paths: Some(
                    ["/etc/passwd", "/etc/shadow", "/etc/hosts", "/proc", "/sys"]
                        .iter()
                        .map(|p| p.to_string())
                        .collect(),
                ),
            },
            process: ProcessPolicy::default(),
        }
    }
}

/// On-disk policy document. Every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    security: Option<PolicyOverrides>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyOverrides {
    network: Option<NetworkOverrides>,
    filesystem: Option<FilesystemOverrides>,
    process: Option<ProcessOverrides>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkOverrides {
    enabled: Option<bool>,
    allowed_hosts: Option<Vec<String>>,
    allowed_ports: Option<Vec<u16>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilesystemOverrides {
    read_only: Option<bool>,
    allowed_write_paths: Option<Vec<String>>,
    blocked_read_paths: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessOverrides {
    allow_spawn: Option<bool>,
    allowed_commands: Option<Vec<String>>,
}

impl SecurityPolicy {
    fn merge(mut self, file: PolicyFile) -> Self {
        let Some(security) = file.security else {
            return self;
        };

        if let Some(network) = security.network {
            self.network.enabled = network.enabled.unwrap_or(self.network.enabled);
            self.network.allowed_hosts = network.allowed_hosts.or(self.network.allowed_hosts);
            self.network.allowed_ports = network.allowed_ports.or(self.network.allowed_ports);
        }
        if let Some(fs) = security.filesystem {
            self.filesystem.read_only = fs.read_only.unwrap_or(self.filesystem.read_only);
            self.filesystem.allowed_write_paths =
                fs.allowed_write_paths.or(self.filesystem.allowed_write_paths);
            self.filesystem.blocked_read_paths =
                fs.blocked_read_paths.or(self.filesystem.blocked_read_paths);
        }
        if let Some(process) = security.process {
            self.process.allow_spawn = process.allow_spawn.unwrap_or(self.process.allow_spawn);
            self.process.allowed_commands =
                process.allowed_commands.or(self.process.allowed_commands);
        }
        self
    }
}

/// Parse a policy document and merge it over the default policy.
pub fn parse_policy(content: &str) -> Result<SecurityPolicy> {
    let file: PolicyFile = if content.trim().is_empty() {
        PolicyFile::default()
    } else {
        serde_yaml::from_str(content)?
    };
    Ok(SecurityPolicy::default().merge(file))
}

/// Load the first policy file present in `service_path`.
///
/// Returns `Ok(None)` when the directory has no policy file.
pub async fn load_policy_file(service_path: &Path) -> Result<Option<SecurityPolicy>> {
    for name in POLICY_FILES {
        let path = service_path.join(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "Loading security policy");
        let policy = parse_policy(&content).map_err(|e| {
            IgniteError::Config(format!("Invalid policy file {}: {}", path.display(), e))
        })?;
        return Ok(Some(policy));
    }
    Ok(None)
}

/// Translate a policy into engine sandbox flags.
pub fn policy_to_engine_flags(policy: &SecurityPolicy) -> SecurityFlags {
    SecurityFlags {
        network_disabled: !policy.network.enabled,
        read_only_rootfs: policy.filesystem.read_only,
        drop_capabilities: true,
        no_new_privileges: true,
        tmpfs_paths: vec!["/tmp".to_string()],
    }
}
