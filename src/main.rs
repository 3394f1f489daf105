use clap::Parser;

use ignite::cli::args::{Cli, Commands};
use ignite::cli::commands;
use ignite::config::load_config;
use ignite::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.global_opts.verbose);

    let config_path = cli.global_opts.config.clone();
    let config = load_config(config_path.as_deref())?;
    let format = cli.global_opts.format;

    let outcome = match cli.command {
        Commands::Run(args) => commands::run(args, config, format).await,
        Commands::Preflight(args) => commands::preflight(args, config, format).await,
        Commands::Lock(args) => commands::lock_env(args, format).await,
        Commands::Env(args) => commands::env(args, format).await,
        Commands::Config(args) => commands::config(args, config, config_path).await,
    };

    if let Err(e) = outcome {
        eprintln!("Error [{}]: {}", e.code(), e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
