use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "ignite")]
#[clap(version, about = "Sandboxed execution for JavaScript and TypeScript services")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "IGNITE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and run a service in a sandboxed container
    Run(RunArgs),

    /// Run preflight checks without executing
    Preflight(PreflightArgs),

    /// Record the service environment in ignite.lock
    Lock(LockArgs),

    /// Show environment and drift information
    Env(EnvArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Service Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Service directory containing service.yaml
    pub path: PathBuf,

    /// JSON input passed to the service as IGNITE_INPUT
    #[clap(long, short = 'i')]
    pub input: Option<String>,

    /// Environment variables to set in the container (KEY=VALUE)
    #[clap(long = "env", short = 'e', value_parser = parse_env_var)]
    pub env_vars: Vec<(String, String)>,

    /// Run even if preflight checks fail
    #[clap(long)]
    pub skip_preflight: bool,

    /// Apply the security policy and print a security audit
    #[clap(long)]
    pub audit: bool,

    /// Override the service runtime (e.g., node@22)
    #[clap(long)]
    pub runtime: Option<String>,
}

#[derive(Args, Debug)]
pub struct PreflightArgs {
    /// Service directory containing service.yaml
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct LockArgs {
    /// Service directory containing service.yaml
    pub path: PathBuf,

    /// Overwrite an existing ignite.lock
    #[clap(long, conflicts_with = "check")]
    pub update: bool,

    /// Check for drift instead of locking (exit code 1 on drift)
    #[clap(long)]
    pub check: bool,
}

#[derive(Args, Debug)]
pub struct EnvArgs {
    /// Service directory containing service.yaml
    pub path: Option<PathBuf>,

    /// List supported runtimes and versions
    #[clap(long)]
    pub runtimes: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[clap(short, long)]
        force: bool,
    },
}

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| "Environment variable format: KEY=VALUE".to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
