//! dlx - download and execute, cached
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use dlx::cli::{Cli, Commands};
use dlx::config::ConfigManager;
use dlx::error::DlxResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Dispatch, returning the process exit code
async fn run() -> DlxResult<i32> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);

    match cli.command {
        Commands::Run(args) => dlx::cli::commands::run(args, &config).await,
        Commands::Pkg(args) => dlx::cli::commands::pkg(args, &config).await,
        Commands::Cache(args) => dlx::cli::commands::cache(args, &config).await.map(|()| 0),
        Commands::Config(args) => dlx::cli::commands::config(args, &config, &config_manager)
            .await
            .map(|()| 0),
    }
}

/// 0 = warn, 1 = info, 2+ = debug; logs go to stderr
fn init_logging(verbose: u8, format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("dlx=warn"),
        1 => EnvFilter::new("dlx=info"),
        _ => EnvFilter::new("dlx=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
