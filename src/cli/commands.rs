use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cli::args::{ConfigAction, ConfigArgs, EnvArgs, LockArgs, OutputFormat, PreflightArgs, RunArgs};
use crate::config::{get_config_path, IgniteConfig};
use crate::environment::{check_drift, format_environment_info, lock};
use crate::error::{IgniteError, Result};
use crate::execution::{ExecuteOptions, ExecutionStateStore, Executor};
use crate::preflight::{run_preflight, CheckStatus, PreflightOptions};
use crate::report::{create_report, format_preflight_text, format_report_text};
use crate::runtime::RuntimeRegistry;
use crate::sandbox::{DockerEngine, TIMEOUT_EXIT_CODE};
use crate::security::format_security_audit;
use crate::service::load_service;

fn executor(config: &IgniteConfig, registry: Arc<RuntimeRegistry>) -> Executor {
    Executor::new(
        Arc::new(DockerEngine::from_config(&config.engine)),
        registry,
        Arc::new(ExecutionStateStore::new()),
        config.clone(),
    )
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Service Commands
// ============================================================================

/// Build, preflight and run a service once
pub async fn run(args: RunArgs, config: IgniteConfig, format: OutputFormat) -> Result<()> {
    let registry = Arc::new(RuntimeRegistry::new());
    let mut service = load_service(&args.path, &registry).await?;

    if let Some(runtime) = &args.runtime {
        service.override_runtime(runtime, &registry)?;
        info!(runtime = %runtime, "Runtime override");
    }

    let input = args
        .input
        .as_deref()
        .map(|raw| {
            serde_json::from_str::<serde_json::Value>(raw)
                .map_err(|_| IgniteError::Config(format!("Invalid JSON input: {}", raw)))
        })
        .transpose()?;

    let executor = executor(&config, registry);
    let name = service.name().to_string();
    let image_name = executor.image_name(&name);

    info!(service = %name, "Running service");
    executor.build_service_image(&service, &image_name).await?;

    let preflight = run_preflight(
        &service,
        executor.engine(),
        &PreflightOptions {
            image_name: Some(image_name),
            last_execution_ms: executor.last_execution_ms(&name),
        },
    )
    .await;

    if !args.skip_preflight && preflight.overall_status == CheckStatus::Fail {
        match format {
            OutputFormat::Text => println!("{}", format_preflight_text(&preflight)),
            OutputFormat::Json => print_json(&preflight)?,
        }
        eprintln!("Preflight checks failed. Use --skip-preflight to force execution.");
        std::process::exit(1);
    }

    let policy = if args.audit {
        Some(executor.effective_policy(&service, None).await?)
    } else {
        None
    };

    let options = ExecuteOptions {
        input,
        env: args.env_vars.into_iter().collect::<BTreeMap<_, _>>(),
        skip_build: true,
        audit: args.audit,
        policy: policy.clone(),
        track_state: true,
    };
    let metrics = executor.execute(&service, &options).await?;
    let audit = policy.map(|policy| executor.audit(&metrics, &policy));
    let exit_code = metrics.exit_code;
    let report = create_report(preflight, Some(metrics));

    match format {
        OutputFormat::Text => {
            println!("{}", format_report_text(&report));
            if let Some(audit) = &audit {
                println!("{}", format_security_audit(audit));
            }
        }
        OutputFormat::Json => match &audit {
            Some(audit) => print_json(&serde_json::json!({ "report": report, "audit": audit }))?,
            None => print_json(&report)?,
        },
    }

    // A timeout is already reported as a critical warning.
    if exit_code != 0 && exit_code != TIMEOUT_EXIT_CODE {
        std::process::exit(exit_code);
    }

    Ok(())
}

/// Run preflight checks against an already built image
pub async fn preflight(args: PreflightArgs, config: IgniteConfig, format: OutputFormat) -> Result<()> {
    let registry = Arc::new(RuntimeRegistry::new());
    let service = load_service(&args.path, &registry).await?;
    let executor = executor(&config, registry);

    let options = PreflightOptions {
        image_name: Some(executor.image_name(service.name())),
        last_execution_ms: executor.last_execution_ms(service.name()),
    };
    let result = run_preflight(&service, executor.engine(), &options).await;

    match format {
        OutputFormat::Text => println!("{}", format_preflight_text(&result)),
        OutputFormat::Json => print_json(&result)?,
    }

    if result.overall_status == CheckStatus::Fail {
        std::process::exit(1);
    }
    Ok(())
}

/// Create, refresh or verify ignite.lock
pub async fn lock_env(args: LockArgs, format: OutputFormat) -> Result<()> {
    let registry = RuntimeRegistry::new();
    let service = load_service(&args.path, &registry).await?;
    let runtime = service.config.service.runtime.clone();

    let existing = check_drift(&service.service_path, &runtime).await?;

    if args.check {
        info!(service = %service.name(), "Checking environment");
        match format {
            OutputFormat::Text => println!("{}", format_environment_info(&existing)),
            OutputFormat::Json => print_json(&existing)?,
        }
        if existing.is_drift {
            std::process::exit(1);
        }
        return Ok(());
    }

    if existing.is_locked && !args.update {
        warn!("Environment already locked. Use --update to refresh the manifest.");
        match format {
            OutputFormat::Text => println!("{}", format_environment_info(&existing)),
            OutputFormat::Json => print_json(&existing)?,
        }
        return Ok(());
    }

    let manifest = lock(&service.service_path, &runtime, &registry).await?;

    match format {
        OutputFormat::Text => {
            println!("Created ignite.lock for {}", service.name());
            println!("  Runtime: {}", manifest.runtime);
            println!(
                "  Lockfile: {}",
                manifest.lockfile.as_deref().unwrap_or("none detected")
            );
            println!("  Checksums: {} file(s)", manifest.checksums.len());
        }
        OutputFormat::Json => print_json(&manifest)?,
    }
    Ok(())
}

/// Show environment info for a service, or list supported runtimes
pub async fn env(args: EnvArgs, format: OutputFormat) -> Result<()> {
    let registry = RuntimeRegistry::new();

    if args.runtimes {
        return list_runtimes(&registry, format);
    }

    let Some(path) = args.path else {
        return Err(IgniteError::Config(
            "Service path required. Use `ignite env <service>` or `ignite env --runtimes`".to_string(),
        ));
    };

    let service = load_service(&path, &registry).await?;
    let runtime = &service.config.service.runtime;
    let info = check_drift(&service.service_path, runtime).await?;

    match format {
        OutputFormat::Text => {
            println!("Service: {}", service.name());
            println!("Runtime: {}", runtime);
            println!();
            println!("{}", format_environment_info(&info));
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "service": service.name(),
            "runtime": runtime,
            "environment": info,
        }))?,
    }
    Ok(())
}

fn list_runtimes(registry: &RuntimeRegistry, format: OutputFormat) -> Result<()> {
    let plugins: Vec<_> = registry
        .list_supported_runtimes()
        .into_iter()
        .filter_map(|name| registry.plugin(&name))
        .collect();

    match format {
        OutputFormat::Text => {
            println!("Supported Runtimes:\n");
            for plugin in &plugins {
                println!("  {}", plugin.name);
                println!("    Default entry: {}", plugin.default_entry);
                println!("    Extensions: {}", plugin.file_extensions.join(", "));
                if let Some(versions) = &plugin.supported_versions {
                    println!(
                        "    Versions: {} (default: {})",
                        versions.join(", "),
                        plugin.default_version.as_deref().unwrap_or("latest")
                    );
                }
                println!();
            }
            println!("Usage examples:");
            println!("  service.yaml: runtime: bun");
            println!("  service.yaml: runtime: node@20");
            println!("  ignite run . --runtime node@22");
        }
        OutputFormat::Json => {
            let runtimes: Vec<_> = plugins
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.name,
                        "defaultEntry": p.default_entry,
                        "extensions": p.file_extensions,
                        "versions": p.supported_versions,
                        "defaultVersion": p.default_version,
                    })
                })
                .collect();
            print_json(&runtimes)?;
        }
    }
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config(args: ConfigArgs, config: IgniteConfig, config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(get_config_path);
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| IgniteError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => init(&path, force)?,
    }
    Ok(())
}

fn init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml_str = toml::to_string_pretty(&IgniteConfig::default())
        .map_err(|e| IgniteError::Config(e.to_string()))?;
    std::fs::write(config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Check a service before running it");
    println!("  ignite preflight ./my-service");
    println!();
    println!("  # Run it with input and a security audit");
    println!("  ignite run ./my-service --input '{{\"name\":\"world\"}}' --audit");
    println!();
    println!("  # Pin its dependency files");
    println!("  ignite lock ./my-service");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        init(&path, false).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("binary = \"docker\""));
        assert!(written.contains("image_prefix = \"ignite\""));

        std::fs::write(&path, "# custom\n").unwrap();
        init(&path, false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# custom\n");

        init(&path, true).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("[engine]"));
    }
}
