//! Runtime registry.
//!
//! Resolves runtime identifiers (`bun`, `node@22`) to plugins. Built-in
//! plugins are fixed at construction; custom plugins can be registered and
//! unregistered while the process runs and take precedence over built-ins.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::{IgniteError, Result};
use crate::runtime::plugin::{builtin_plugins, RuntimePlugin};
use crate::runtime::spec::{version_matches, RuntimeSpec};

/// A runtime identifier resolved against the registry.
#[derive(Debug, Clone)]
pub struct ResolvedRuntime {
    pub name: String,
    /// Requested version, else the plugin default
    pub version: Option<String>,
    pub default_entry: String,
    pub file_extensions: Vec<String>,
    pub plugin: Arc<RuntimePlugin>,
}

impl ResolvedRuntime {
    pub fn generate_recipe(&self) -> String {
        self.plugin.generate_recipe(self.version.as_deref())
    }
}

pub struct RuntimeRegistry {
    builtins: BTreeMap<String, Arc<RuntimePlugin>>,
    custom: RwLock<HashMap<String, Arc<RuntimePlugin>>>,
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeRegistry {
    /// Create a registry holding the built-in plugins.
    pub fn new() -> Self {
        let builtins = builtin_plugins()
            .into_iter()
            .map(|plugin| (plugin.name.clone(), Arc::new(plugin)))
            .collect();
        Self {
            builtins,
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a plugin by bare name, custom registrations first.
    pub fn plugin(&self, name: &str) -> Option<Arc<RuntimePlugin>> {
        let custom = self
            .custom
            .read()
            .ok()
            .and_then(|custom| custom.get(name).cloned());
        custom.or_else(|| self.builtins.get(name).cloned())
    }

    pub fn resolve(&self, identifier: &str) -> Result<ResolvedRuntime> {
        let spec = RuntimeSpec::parse(identifier);
        let plugin = self
            .plugin(&spec.name)
            .ok_or_else(|| IgniteError::UnknownRuntime {
                name: spec.name.clone(),
                available: self.list_supported_runtimes().join(", "),
            })?;

        let version = spec.version.or_else(|| plugin.default_version.clone());

        if let Some(version) = &version {
            if !version_matches(version, plugin.supported_versions.as_deref()) {
                return Err(IgniteError::UnsupportedVersion {
                    runtime: plugin.name.clone(),
                    version: version.clone(),
                    supported: plugin
                        .supported_versions
                        .as_deref()
                        .unwrap_or_default()
                        .join(", "),
                });
            }
        }

        debug!(runtime = %plugin.name, version = ?version, "Resolved runtime");

        Ok(ResolvedRuntime {
            name: plugin.name.clone(),
            version,
            default_entry: plugin.default_entry.clone(),
            file_extensions: plugin.file_extensions.clone(),
            plugin,
        })
    }

    pub fn is_valid_runtime(&self, identifier: &str) -> bool {
        self.resolve(identifier).is_ok()
    }

    /// Built-in and custom runtime names, sorted.
    pub fn list_supported_runtimes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtins.keys().cloned().collect();
        if let Ok(custom) = self.custom.read() {
            names.extend(custom.keys().cloned());
        }
        names.sort();
        names.dedup();
        names
    }

    pub fn list_supported_versions(&self, name: &str) -> Vec<String> {
        self.plugin(name)
            .and_then(|plugin| plugin.supported_versions.clone())
            .unwrap_or_default()
    }

    /// Register a custom plugin, replacing any custom plugin of the same name.
    pub fn register_runtime(&self, plugin: RuntimePlugin) -> Result<()> {
        if !plugin.is_consistent() {
            return Err(IgniteError::Config(format!(
                "Runtime plugin '{}' does not build its default entry '{}'",
                plugin.name, plugin.default_entry
            )));
        }

        let name = plugin.name.clone();
        let mut custom = self
            .custom
            .write()
            .map_err(|e| IgniteError::Config(format!("Runtime registry poisoned: {}", e)))?;
        custom.insert(name.clone(), Arc::new(plugin));
        info!(runtime = %name, "Registered custom runtime");
        Ok(())
    }

    /// Remove a custom plugin. Returns false if it was never registered.
    pub fn unregister_runtime(&self, name: &str) -> bool {
        match self.custom.write() {
            Ok(mut custom) => {
                let removed = custom.remove(name).is_some();
                if removed {
                    info!(runtime = %name, "Unregistered custom runtime");
                }
                removed
            }
            Err(_) => false,
        }
    }
}
