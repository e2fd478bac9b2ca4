use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;
mod host;

use cli::Cli;
use cli::commands::Commands;
use host::{ConsoleHooks, LoggingFactory};
use pollmux::config::{PollmuxConfig, load_config};
use pollmux::registry::SessionRegistry;
use pollmux::source::{EventSource, HttpEventSource};

fn setup_logging(to_stderr: bool) -> Result<()> {
    if to_stderr {
        env_logger::Builder::from_default_env().init();
        return Ok(());
    }

    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pollmux")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("pollmux.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: PollmuxConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match cli.command.clone().unwrap_or(Commands::Run {
        keep_backlog: false,
        idle_timeout_ms: None,
    }) {
        Commands::Run {
            keep_backlog,
            idle_timeout_ms,
        } => handle_run_command(config, keep_backlog, idle_timeout_ms, cli.is_verbose()).await,
        Commands::Whoami => handle_whoami_command(&config).await,
        Commands::Config => handle_config_command(&config),
    }
}

async fn handle_run_command(
    mut config: PollmuxConfig,
    keep_backlog: bool,
    idle_timeout_ms: Option<u64>,
    echo: bool,
) -> Result<()> {
    if keep_backlog {
        config.poll.skip_backlog = false;
    }
    if let Some(ms) = idle_timeout_ms {
        config.sessions.idle_timeout_ms = (ms > 0).then_some(ms);
    }
    config.validate()?;

    let source = HttpEventSource::from_env(&config.transport.token_env, config.http_source_config())?;
    let factory = LoggingFactory::new(config.identifier(), echo);
    let mut registry = SessionRegistry::new(source, factory, config.registry_config());

    let summary = registry
        .run(&mut ConsoleHooks)
        .await
        .context("Poller failed")?;

    if let Some(identity) = &summary.identity {
        println!("{} {}", "Ran as:".green(), identity);
    }
    println!(
        "{} {} batches, {} events, {} failed cycles, cursor {}",
        "Polled:".green(),
        summary.poll.batches,
        summary.poll.events,
        summary.poll.failures,
        summary.cursor
    );
    println!(
        "{} {} created, {} evicted, {} closed at shutdown",
        "Sessions:".green(),
        summary.sessions.created,
        summary.sessions.evicted,
        summary.sessions.closed
    );
    Ok(())
}

async fn handle_whoami_command(config: &PollmuxConfig) -> Result<()> {
    let source = HttpEventSource::from_env(&config.transport.token_env, config.http_source_config())?;
    let identity = source
        .resolve_identity()
        .await
        .context("Failed to resolve identity")?;
    println!("{} {}", "Identity:".green(), identity);
    Ok(())
}

fn handle_config_command(config: &PollmuxConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to render config")?;
    print!("{}", yaml);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging before anything else logs
    setup_logging(cli.log_stderr).context("Failed to setup logging")?;

    // Load configuration
    let config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
