use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgniteConfig {
    pub engine: EngineConfig,
    pub execution: ExecutionConfig,
}

/// Container engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine CLI binary (default: docker)
    pub binary: String,
    /// Working directory inside the container, where the service is mounted
    pub workdir: String,
    /// CPU limit used when a service does not declare one
    pub default_cpus: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            workdir: "/app".to_string(),
            default_cpus: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Prefix for generated image and container names
    pub image_prefix: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            image_prefix: "ignite".to_string(),
        }
    }
}
