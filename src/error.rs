use thiserror::Error;

#[derive(Error, Debug)]
pub enum IgniteError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Service errors
    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Runtime registry errors
    #[error("Unknown runtime: {name}. Available runtimes: {available}")]
    UnknownRuntime { name: String, available: String },

    #[error("Unsupported version '{version}' for runtime '{runtime}'. Supported versions: {supported}")]
    UnsupportedVersion {
        runtime: String,
        version: String,
        supported: String,
    },

    // Container engine errors
    #[error("Container engine error: {0}")]
    Runtime(String),

    #[error("Failed to run '{command}': {source}")]
    EngineSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Execution errors
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Preflight error: {0}")]
    Preflight(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IgniteError {
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
            source: None,
        }
    }

    pub fn service_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Service {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::TomlParse(_) | Self::Yaml(_) | Self::Json(_) => "CONFIG_ERROR",
            Self::Service { .. } => "SERVICE_ERROR",
            Self::UnknownRuntime { .. } => "UNKNOWN_RUNTIME",
            Self::UnsupportedVersion { .. } => "UNSUPPORTED_VERSION",
            Self::Runtime(_) | Self::EngineSpawn { .. } => "RUNTIME_ERROR",
            Self::Execution(_) => "EXECUTION_ERROR",
            Self::Preflight(_) => "PREFLIGHT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, IgniteError>;
