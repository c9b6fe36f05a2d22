//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// nfguard -- NFQUEUE interception rule management.
///
/// Use `nfguard <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "nfguard", version, about, long_about = None)]
pub struct Cli {
    /// Path to the nfguard.toml configuration file.
    #[arg(short, long, default_value = "/etc/nfguard/nfguard.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check whether the interception rules are currently loaded.
    Status(StatusArgs),

    /// Install the interception rules once (no reconciliation).
    Install(RuleArgs),

    /// Remove the interception rules.
    Remove(RuleArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- status ----

/// Report daemon liveness and rule presence.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show per-rule, per-family results.
    #[arg(short, long)]
    pub verbose: bool,
}

// ---- install / remove ----

/// Rule selection shared by `install` and `remove`.
#[derive(Args, Debug)]
pub struct RuleArgs {
    /// Override the NFQUEUE number from the configuration.
    #[arg(long)]
    pub queue_num: Option<u16>,

    /// Skip the DNS response redirect rule.
    #[arg(long)]
    pub no_dns: bool,
}

// ---- config ----

/// Manage nfguard configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, firewall, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}
