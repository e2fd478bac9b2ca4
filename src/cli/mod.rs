//! CLI module for pollmux - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the poller,
//! checking the remote identity, and printing the effective configuration.

pub mod commands;

pub use commands::Cli;
