//! CLI argument definitions for nfguard-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use nfguard_core::config::NfguardConfig;

/// nfguard interception rule daemon.
///
/// Installs the NFQUEUE interception rules, keeps them in place while
/// running, and removes them on shutdown.
#[derive(Parser, Debug)]
#[command(name = "nfguard-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to nfguard.toml configuration file.
    #[arg(short, long, default_value = "/etc/nfguard/nfguard.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the NFQUEUE number.
    #[arg(long)]
    pub queue_num: Option<u16>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut NfguardConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
        if let Some(queue_num) = self.queue_num {
            config.firewall.queue_num = queue_num;
        }
    }
}
