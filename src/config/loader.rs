use std::path::{Path, PathBuf};

use crate::config::types::IgniteConfig;
use crate::error::{IgniteError, Result};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "ignite", "ignite") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        home_fallback().join(".ignite").join("config.toml")
    }
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<IgniteConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        return Ok(IgniteConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    parse_config(&content)
}

fn parse_config(content: &str) -> Result<IgniteConfig> {
    let config: IgniteConfig =
        toml::from_str(content).map_err(|e| IgniteError::TomlParse(e.to_string()))?;

    if config.engine.binary.trim().is_empty() {
        return Err(IgniteError::Config("engine.binary must not be empty".to_string()));
    }
    if !config.engine.default_cpus.is_finite() || config.engine.default_cpus <= 0.0 {
        return Err(IgniteError::Config(
            "engine.default_cpus must be a positive number".to_string(),
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.engine.binary, "docker");
        assert_eq!(config.engine.workdir, "/app");
        assert_eq!(config.execution.image_prefix, "ignite");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse_config("[engine]\nbinary = \"podman\"\n").unwrap();
        assert_eq!(config.engine.binary, "podman");
        assert_eq!(config.engine.default_cpus, 1.0);
    }

    #[test]
    fn test_rejects_non_positive_cpus() {
        let err = parse_config("[engine]\ndefault_cpus = 0.0\n").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
