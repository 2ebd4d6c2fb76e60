//! Bastion CLI
//!
//! Main entry point for the bastion command-line tool.
//! Answers questions from only the documents a caller is allowed to see.

mod commands;
mod services;

use bastion_core::{config::AppConfig, logging, AppResult};
use clap::{Parser, Subcommand};
use commands::{AskCommand, ModelsCommand, RouteCommand};
use std::path::PathBuf;

/// Bastion - security-trimmed retrieval and answering
#[derive(Parser, Debug)]
#[command(name = "bastion")]
#[command(about = "Security-trimmed retrieval and answering", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "BASTION_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a question as a given caller
    Ask(AskCommand),

    /// Show which model a request would be routed to
    Route(RouteCommand),

    /// List the model registry
    Models(ModelsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();

    let config = AppConfig::load()?.with_overrides(
        cli.config,
        cli.log_level,
        cli.verbose,
        cli.no_color,
        cli.json_logs,
    )?;

    logging::init_logging(config.log_level.as_deref(), config.no_color, config.json_logs)?;

    tracing::info!("Bastion CLI starting");
    tracing::debug!("Config file: {:?}", config.config_file);

    let command_name = match &cli.command {
        Commands::Ask(_) => "ask",
        Commands::Route(_) => "route",
        Commands::Models(_) => "models",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Route(cmd) => cmd.execute(&config).await,
        Commands::Models(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
