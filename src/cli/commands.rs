//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: poll the remote queue and route events into sessions
//! - whoami: resolve and print the remote identity
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pollmux - long-poll a remote event queue into per-actor sessions
#[derive(Parser, Debug)]
#[command(name = "pollmux")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Poll the remote queue until interrupted (default)
    Run {
        /// Process events that were pending before startup
        #[arg(long)]
        keep_backlog: bool,

        /// Idle eviction timeout in milliseconds (0 disables eviction)
        #[arg(long)]
        idle_timeout_ms: Option<u64>,
    },

    /// Resolve and print the remote identity
    Whoami,

    /// Print the effective configuration as YAML
    Config,
}
