use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::IgniteConfig;
use crate::error::{IgniteError, Result};
use crate::execution::metrics::{parse_metrics, ExecutionMetrics};
use crate::execution::state::ExecutionStateStore;
use crate::runtime::RuntimeRegistry;
use crate::sandbox::{BuildRequest, ContainerEngine, RunRequest, VolumeMount};
use crate::security::{load_policy_file, parse_audit, policy_to_engine_flags, SecurityAudit, SecurityPolicy};
use crate::service::LoadedService;

/// Environment keys set by the executor, overriding anything user supplied.
pub const INPUT_ENV: &str = "IGNITE_INPUT";
const RECIPE_FILE: &str = "Dockerfile";

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// JSON payload exposed to the service as `IGNITE_INPUT`
    pub input: Option<serde_json::Value>,
    pub env: BTreeMap<String, String>,
    /// Reuse the existing image instead of building
    pub skip_build: bool,
    /// Apply a security policy to this run
    pub audit: bool,
    /// Explicit policy, else the service's policy file, else the default
    pub policy: Option<SecurityPolicy>,
    /// Create execution state for this service if missing
    pub track_state: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            input: None,
            env: BTreeMap::new(),
            skip_build: false,
            audit: false,
            policy: None,
            track_state: true,
        }
    }
}

/// Builds and runs services against a container engine.
pub struct Executor {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<RuntimeRegistry>,
    state: Arc<ExecutionStateStore>,
    config: IgniteConfig,
}

impl Executor {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<RuntimeRegistry>,
        state: Arc<ExecutionStateStore>,
        config: IgniteConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            state,
            config,
        }
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn image_name(&self, service: &str) -> String {
        format!("{}-{}:latest", self.config.execution.image_prefix, service)
    }

    fn container_name(&self, service: &str) -> String {
        format!(
            "{}-{}-{}",
            self.config.execution.image_prefix,
            service,
            Utc::now().timestamp_millis()
        )
    }

    pub fn last_execution_ms(&self, service: &str) -> Option<u64> {
        self.state.last_execution_ms(service)
    }

    pub fn reset_state(&self, service: &str) -> bool {
        self.state.reset(service)
    }

    /// Policy applied to an audited run of `service`.
    pub async fn effective_policy(
        &self,
        service: &LoadedService,
        explicit: Option<&SecurityPolicy>,
    ) -> Result<SecurityPolicy> {
        if let Some(policy) = explicit {
            return Ok(policy.clone());
        }
        Ok(load_policy_file(&service.service_path)
            .await?
            .unwrap_or_default())
    }

    /// Build (unless skipped) and run a service once.
    pub async fn execute(
        &self,
        service: &LoadedService,
        options: &ExecuteOptions,
    ) -> Result<ExecutionMetrics> {
        if !self.engine.is_available().await {
            return Err(IgniteError::Execution(format!(
                "Container engine '{}' is not available to run service {}. Please ensure it is running.",
                self.engine.name(),
                service.name()
            )));
        }

        let name = service.name();
        let image_name = self.image_name(name);
        let container_name = self.container_name(name);

        let state = if options.track_state {
            self.state.begin(name)
        } else {
            self.state.get(name).unwrap_or_default()
        };
        let cold_start = state.is_cold();

        if !options.skip_build {
            info!(service = %name, image = %image_name, "Building image");
            self.build_service_image(service, &image_name).await?;
        }

        let security = if options.audit {
            let policy = self.effective_policy(service, options.policy.as_ref()).await?;
            Some(policy_to_engine_flags(&policy))
        } else {
            None
        };

        let section = &service.config.service;
        let request = RunRequest {
            image_name,
            container_name,
            memory_limit_mb: section.memory_mb,
            cpu_limit: Some(section.cpu_limit.unwrap_or(self.config.engine.default_cpus)),
            timeout: Duration::from_millis(section.timeout_ms),
            workdir: self.config.engine.workdir.clone(),
            volumes: vec![VolumeMount {
                host_path: service.service_path.clone(),
                container_path: self.config.engine.workdir.clone(),
                readonly: true,
            }],
            env: merge_env(&section.env, &options.env, options.input.as_ref())?,
            security,
            command: Vec::new(),
        };

        info!(service = %name, cold_start, "Executing service");
        let result = self.engine.run(&request).await?;
        let metrics = parse_metrics(&result, cold_start);

        if options.track_state {
            self.state.record(name, metrics.execution_time_ms);
        } else {
            self.state.update_existing(name, metrics.execution_time_ms);
        }
        debug!(
            service = %name,
            exit_code = metrics.exit_code,
            duration_ms = metrics.execution_time_ms,
            "Execution finished"
        );

        if result.oom_killed {
            return Err(IgniteError::Execution(format!(
                "Service {} was killed due to memory limit ({}MB)",
                name, section.memory_mb
            )));
        }

        Ok(metrics)
    }

    /// Generate the runtime recipe into a temp dir and build the service image.
    pub async fn build_service_image(&self, service: &LoadedService, image_name: &str) -> Result<()> {
        let runtime = self.registry.resolve(&service.config.service.runtime)?;
        let recipe = runtime.generate_recipe();

        // Removed on drop, whether or not the build succeeds.
        let build_dir = tempfile::Builder::new().prefix("ignite-build-").tempdir()?;
        let recipe_path = build_dir.path().join(RECIPE_FILE);
        tokio::fs::write(&recipe_path, recipe).await?;

        let request = BuildRequest {
            context_path: service.service_path.clone(),
            recipe_path,
            image_name: image_name.to_string(),
            build_args: BTreeMap::from([(
                "ENTRY_FILE".to_string(),
                service.config.service.entry.clone(),
            )]),
        };

        self.engine.build(&request).await
    }

    /// Heuristic security audit of a finished run's output.
    pub fn audit(&self, metrics: &ExecutionMetrics, policy: &SecurityPolicy) -> SecurityAudit {
        parse_audit(&metrics.stdout, &metrics.stderr, policy)
    }
}

/// Service env, then caller env, then the reserved keys.
fn merge_env(
    service: &BTreeMap<String, String>,
    caller: &BTreeMap<String, String>,
    input: Option<&serde_json::Value>,
) -> Result<BTreeMap<String, String>> {
    let mut env = service.clone();
    env.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));

    let input = match input {
        Some(value) => serde_json::to_string(value)?,
        None => String::new(),
    };
    env.insert(INPUT_ENV.to_string(), input);
    env.insert("NODE_ENV".to_string(), "production".to_string());
    Ok(env)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::preflight::fixtures::service;
    use crate::sandbox::{ImageInfo, RunResult};

    #[derive(Default)]
    struct MockEngine {
        unavailable: bool,
        oom: bool,
        recipes: Mutex<Vec<(BuildRequest, String)>>,
        runs: Mutex<Vec<RunRequest>>,
    }

    #[async_trait]
    impl ContainerEngine for MockEngine {
        fn name(&self) -> &str {
            "mock"
        }

        async fn is_available(&self) -> bool {
            !self.unavailable
        }

        async fn build(&self, request: &BuildRequest) -> Result<()> {
            let recipe = std::fs::read_to_string(&request.recipe_path)?;
            self.recipes.lock().unwrap().push((request.clone(), recipe));
            Ok(())
        }

        async fn run(&self, request: &RunRequest) -> Result<RunResult> {
            self.runs.lock().unwrap().push(request.clone());
            Ok(RunResult {
                exit_code: if self.oom { 137 } else { 0 },
                stdout: "done".to_string(),
                stderr: "IGNITE_INIT_TIME:12\nIGNITE_MEMORY_MB:20".to_string(),
                duration_ms: 300,
                oom_killed: self.oom,
            })
        }

        async fn inspect_image(&self, _image: &str) -> Option<ImageInfo> {
            None
        }
    }

    fn executor(engine: Arc<MockEngine>) -> Executor {
        Executor::new(
            engine,
            Arc::new(RuntimeRegistry::new()),
            Arc::new(ExecutionStateStore::new()),
            IgniteConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_cold_then_warm() {
        let engine = Arc::new(MockEngine::default());
        let executor = executor(engine.clone());
        let svc = service(128, 5000, None);

        let first = executor.execute(&svc, &ExecuteOptions::default()).await.unwrap();
        assert!(first.cold_start);
        assert_eq!(first.cold_start_time_ms, Some(12));
        assert_eq!(first.memory_usage_mb, 20.0);

        let second = executor.execute(&svc, &ExecuteOptions::default()).await.unwrap();
        assert!(!second.cold_start);
        assert_eq!(second.cold_start_time_ms, None);
        assert_eq!(executor.last_execution_ms("hello"), Some(300));

        assert!(executor.reset_state("hello"));
        let third = executor.execute(&svc, &ExecuteOptions::default()).await.unwrap();
        assert!(third.cold_start);
    }

    #[tokio::test]
    async fn test_build_and_run_requests() {
        let engine = Arc::new(MockEngine::default());
        let executor = executor(engine.clone());
        let mut svc = service(256, 2000, None);
        svc.config.service.env = BTreeMap::from([
            ("GREETING".to_string(), "hi".to_string()),
            ("NODE_ENV".to_string(), "development".to_string()),
        ]);

        let options = ExecuteOptions {
            input: Some(serde_json::json!({"width": 100})),
            env: BTreeMap::from([
                ("GREETING".to_string(), "hello".to_string()),
                (INPUT_ENV.to_string(), "ignored".to_string()),
            ]),
            ..Default::default()
        };
        executor.execute(&svc, &options).await.unwrap();

        let recipes = engine.recipes.lock().unwrap();
        let (build, recipe) = &recipes[0];
        assert_eq!(build.image_name, "ignite-hello:latest");
        assert_eq!(build.build_args.get("ENTRY_FILE").map(String::as_str), Some("index.ts"));
        assert!(recipe.starts_with("FROM oven/bun:1.3-alpine"));
        assert!(!build.recipe_path.exists());

        let runs = engine.runs.lock().unwrap();
        let run = &runs[0];
        assert!(run.container_name.starts_with("ignite-hello-"));
        assert_eq!(run.memory_limit_mb, 256);
        assert_eq!(run.cpu_limit, Some(1.0));
        assert_eq!(run.timeout, Duration::from_millis(2000));
        assert_eq!(run.workdir, "/app");
        assert!(run.volumes[0].readonly);
        assert_eq!(run.volumes[0].container_path, "/app");
        assert_eq!(run.env["GREETING"], "hello");
        assert_eq!(run.env["NODE_ENV"], "production");
        assert_eq!(run.env[INPUT_ENV], r#"{"width":100}"#);
        assert!(run.security.is_none());
    }

    #[tokio::test]
    async fn test_skip_build_and_audit_flags() {
        let engine = Arc::new(MockEngine::default());
        let executor = executor(engine.clone());
        let svc = service(128, 5000, None);

        let options = ExecuteOptions {
            skip_build: true,
            audit: true,
            ..Default::default()
        };
        executor.execute(&svc, &options).await.unwrap();

        assert!(engine.recipes.lock().unwrap().is_empty());
        let runs = engine.runs.lock().unwrap();
        let flags = runs[0].security.as_ref().unwrap();
        assert!(flags.network_disabled);
        assert!(flags.read_only_rootfs);
        assert_eq!(runs[0].env[INPUT_ENV], "");
    }

    #[tokio::test]
    async fn test_explicit_policy_wins() {
        let engine = Arc::new(MockEngine::default());
        let executor = executor(engine.clone());
        let svc = service(128, 5000, None);

        let mut policy = SecurityPolicy::default();
        policy.network.enabled = true;
        let options = ExecuteOptions {
            skip_build: true,
            audit: true,
            policy: Some(policy),
            ..Default::default()
        };
        executor.execute(&svc, &options).await.unwrap();
        let runs = engine.runs.lock().unwrap();
        assert!(!runs[0].security.as_ref().unwrap().network_disabled);
    }

    #[tokio::test]
    async fn test_oom_is_error_after_state_update() {
        let engine = Arc::new(MockEngine {
            oom: true,
            ..Default::default()
        });
        let executor = executor(engine);
        let svc = service(64, 5000, None);

        let err = executor.execute(&svc, &ExecuteOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_ERROR");
        assert!(err.to_string().contains("killed due to memory limit (64MB)"));
        assert_eq!(executor.last_execution_ms("hello"), Some(300));
    }

    #[tokio::test]
    async fn test_unavailable_engine() {
        let engine = Arc::new(MockEngine {
            unavailable: true,
            ..Default::default()
        });
        let executor = executor(engine.clone());
        let err = executor
            .execute(&service(128, 5000, None), &ExecuteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EXECUTION_ERROR");
        assert!(err.to_string().contains("service hello"));
        assert!(engine.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_untracked_run_stays_cold() {
        let engine = Arc::new(MockEngine::default());
        let executor = executor(engine);
        let svc = service(128, 5000, None);
        let options = ExecuteOptions {
            skip_build: true,
            track_state: false,
            ..Default::default()
        };
        let first = executor.execute(&svc, &options).await.unwrap();
        let second = executor.execute(&svc, &options).await.unwrap();
        assert!(first.cold_start);
        assert!(second.cold_start);
        assert!(executor.state.get("hello").is_none());

        // Existing history is still updated by untracked runs.
        executor.execute(&svc, &ExecuteOptions::default()).await.unwrap();
        executor.execute(&svc, &options).await.unwrap();
        assert_eq!(executor.state.get("hello").map(|s| s.run_count), Some(2));
    }

    #[test]
    fn test_audit_uses_run_output() {
        let executor = executor(Arc::new(MockEngine::default()));
        let metrics = ExecutionMetrics {
            execution_time_ms: 10,
            memory_usage_mb: 0.0,
            cold_start: false,
            cold_start_time_ms: None,
            exit_code: 1,
            stdout: String::new(),
            stderr: "Error: spawn sh EACCES".to_string(),
        };
        let audit = executor.audit(&metrics, &SecurityPolicy::default());
        assert_eq!(audit.summary.process_blocked, 1);
    }
}
