//! Environment manifest (`ignite.lock`) and drift detection.
//!
//! A manifest records the resolved runtime and a SHA-256 of each dependency
//! file present when the service was locked. Comparing it against the live
//! directory later reveals drift.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{IgniteError, Result};
use crate::runtime::{RuntimeRegistry, RuntimeSpec};

pub const MANIFEST_FILE: &str = "ignite.lock";
pub const MANIFEST_VERSION: &str = "1.0";

/// Files hashed into the manifest when present.
pub const WATCHED_FILES: [&str; 7] = [
    "package.json",
    "bun.lockb",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "deno.json",
    "deno.lock",
];

/// Lock files in detection priority order.
const LOCKFILES: [&str; 5] = [
    "bun.lockb",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "deno.lock",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentManifest {
    pub version: String,
    pub runtime: RuntimeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockfile: Option<String>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub manifest: Option<EnvironmentManifest>,
    pub is_locked: bool,
    pub is_drift: bool,
    pub drift_details: Vec<String>,
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash the watched files of `service_path` and resolve the runtime version.
pub async fn create_manifest(
    service_path: &Path,
    runtime: &str,
    registry: &RuntimeRegistry,
) -> Result<EnvironmentManifest> {
    let spec = RuntimeSpec::parse(runtime);
    let version = spec
        .version
        .clone()
        .or_else(|| registry.plugin(&spec.name).and_then(|p| p.default_version.clone()))
        .unwrap_or_else(|| "latest".to_string());

    let mut checksums = BTreeMap::new();
    for file in WATCHED_FILES {
        if let Some(hash) = hash_file(&service_path.join(file)).await? {
            checksums.insert(file.to_string(), hash);
        }
    }

    let mut lockfile = None;
    for candidate in LOCKFILES {
        if tokio::fs::try_exists(service_path.join(candidate)).await? {
            lockfile = Some(candidate.to_string());
            break;
        }
    }

    Ok(EnvironmentManifest {
        version: MANIFEST_VERSION.to_string(),
        runtime: RuntimeSpec {
            name: spec.name,
            version: Some(version),
        },
        lockfile,
        checksums,
        created_at: Utc::now().to_rfc3339(),
    })
}

/// SHA-256 of a file, `None` when it does not exist.
async fn hash_file(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(Some(sha256_hex(&content))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn load_manifest(service_path: &Path) -> Result<Option<EnvironmentManifest>> {
    let path = service_path.join(MANIFEST_FILE);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let manifest = serde_yaml::from_str(&content)
        .map_err(|e| IgniteError::Config(format!("Invalid {}: {}", path.display(), e)))?;
    Ok(Some(manifest))
}

pub async fn save_manifest(service_path: &Path, manifest: &EnvironmentManifest) -> Result<()> {
    let path = service_path.join(MANIFEST_FILE);
    let content = serde_yaml::to_string(manifest)?;
    tokio::fs::write(&path, content).await?;
    debug!(path = %path.display(), "Saved environment manifest");
    Ok(())
}

/// Compare the stored manifest with the live directory and runtime.
pub async fn check_drift(service_path: &Path, runtime: &str) -> Result<EnvironmentInfo> {
    let Some(manifest) = load_manifest(service_path).await? else {
        return Ok(EnvironmentInfo {
            manifest: None,
            is_locked: false,
            is_drift: false,
            drift_details: Vec::new(),
        });
    };

    let current = RuntimeSpec::parse(runtime);
    let mut details = Vec::new();

    if manifest.runtime.name != current.name {
        details.push(format!(
            "Runtime changed: {} -> {}",
            manifest.runtime.name, current.name
        ));
    }

    if let Some(requested) = &current.version {
        if manifest.runtime.version.as_ref() != Some(requested) {
            details.push(format!(
                "Version changed: {} -> {}",
                manifest.runtime.version.as_deref().unwrap_or("none"),
                requested
            ));
        }
    }

    for (file, expected) in &manifest.checksums {
        match hash_file(&service_path.join(file)).await? {
            Some(actual) if &actual == expected => {}
            Some(_) => details.push(format!("File modified: {}", file)),
            None => details.push(format!("File removed: {}", file)),
        }
    }

    if !details.is_empty() {
        debug!(path = %service_path.display(), drift = details.len(), "Environment drift detected");
    }

    Ok(EnvironmentInfo {
        manifest: Some(manifest),
        is_locked: true,
        is_drift: !details.is_empty(),
        drift_details: details,
    })
}

/// Create and persist a manifest, replacing any existing one.
pub async fn lock(
    service_path: &Path,
    runtime: &str,
    registry: &RuntimeRegistry,
) -> Result<EnvironmentManifest> {
    let manifest = create_manifest(service_path, runtime, registry).await?;
    save_manifest(service_path, &manifest).await?;
    info!(
        path = %service_path.display(),
        runtime = %manifest.runtime,
        files = manifest.checksums.len(),
        "Locked environment"
    );
    Ok(manifest)
}

pub fn format_environment_info(info: &EnvironmentInfo) -> String {
    let Some(manifest) = info.manifest.as_ref().filter(|_| info.is_locked) else {
        return "Environment: Not locked\n  Run `ignite lock` to create ignite.lock".to_string();
    };

    let mut lines = vec![
        "Environment: Locked".to_string(),
        format!("  Runtime: {}", manifest.runtime),
        format!("  Locked at: {}", manifest.created_at),
    ];
    if let Some(lockfile) = &manifest.lockfile {
        lines.push(format!("  Lockfile: {}", lockfile));
    }

    lines.push(String::new());
    if info.is_drift {
        lines.push("WARNING: Environment drift detected:".to_string());
        for detail in &info.drift_details {
            lines.push(format!("    - {}", detail));
        }
        lines.push(String::new());
        lines.push("  Run `ignite lock --update` to update the manifest".to_string());
    } else {
        lines.push("Environment matches manifest".to_string());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name":"hello"}"#).unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "# yarn lockfile v1\n").unwrap();
        std::fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        dir
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_create_manifest() {
        let dir = fixture();
        let registry = RuntimeRegistry::new();
        let manifest = create_manifest(dir.path(), "node", &registry).await.unwrap();

        assert_eq!(manifest.version, "1.0");
        assert_eq!(manifest.runtime.name, "node");
        assert_eq!(manifest.runtime.version.as_deref(), Some("20"));
        // package-lock.json outranks yarn.lock
        assert_eq!(manifest.lockfile.as_deref(), Some("package-lock.json"));
        let files: Vec<&str> = manifest.checksums.keys().map(String::as_str).collect();
        assert_eq!(files, ["package-lock.json", "package.json", "yarn.lock"]);

        let unknown = create_manifest(dir.path(), "mystery", &registry).await.unwrap();
        assert_eq!(unknown.runtime.version.as_deref(), Some("latest"));
        let pinned = create_manifest(dir.path(), "bun@1.2", &registry).await.unwrap();
        assert_eq!(pinned.runtime.version.as_deref(), Some("1.2"));
    }

    #[tokio::test]
    async fn test_lock_then_check_has_no_drift() {
        let dir = fixture();
        let registry = RuntimeRegistry::new();
        lock(dir.path(), "bun@1.3", &registry).await.unwrap();

        let info = check_drift(dir.path(), "bun@1.3").await.unwrap();
        assert!(info.is_locked);
        assert!(!info.is_drift);
        assert!(info.drift_details.is_empty());
        assert!(format_environment_info(&info).contains("Environment matches manifest"));

        // Unversioned runtime skips the version comparison.
        assert!(!check_drift(dir.path(), "bun").await.unwrap().is_drift);
    }

    #[tokio::test]
    async fn test_drift_details() {
        let dir = fixture();
        let registry = RuntimeRegistry::new();
        lock(dir.path(), "bun@1.3", &registry).await.unwrap();

        std::fs::write(dir.path().join("package.json"), r#"{"name":"changed"}"#).unwrap();
        std::fs::remove_file(dir.path().join("yarn.lock")).unwrap();

        let info = check_drift(dir.path(), "node@22").await.unwrap();
        assert!(info.is_drift);
        assert_eq!(
            info.drift_details,
            vec![
                "Runtime changed: bun -> node",
                "Version changed: 1.3 -> 22",
                "File modified: package.json",
                "File removed: yarn.lock",
            ]
        );
        let text = format_environment_info(&info);
        assert!(text.contains("WARNING: Environment drift detected:"));
        assert!(text.contains("    - File removed: yarn.lock"));
    }

    #[tokio::test]
    async fn test_unlocked_directory() {
        let dir = tempfile::tempdir().unwrap();
        let info = check_drift(dir.path(), "bun").await.unwrap();
        assert!(!info.is_locked);
        assert!(!info.is_drift);
        assert!(format_environment_info(&info).starts_with("Environment: Not locked"));
    }

    #[tokio::test]
    async fn test_manifest_yaml_shape() {
        let dir = fixture();
        let registry = RuntimeRegistry::new();
        lock(dir.path(), "deno", &registry).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(content.contains("createdAt:"));
        assert!(content.contains("version: '2.0'") || content.contains("version: \"2.0\""));

        let loaded = load_manifest(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.runtime.to_string(), "deno@2.0");
    }
}
