//! `nfguard status` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use nfguard_core::config::NfguardConfig;
use nfguard_firewall::{
    CommandExecutor, DriftReport, FirewallEngine, FirewallEngineConfig, RulePresence,
    SystemExecutor,
};

use crate::cli::StatusArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `status` command.
///
/// Renders the report first, then returns [`CliError::RulesMissing`] when the
/// rules are not loaded so scripts can rely on the exit code.
pub async fn execute(
    args: StatusArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = NfguardConfig::load(config_path).await?;
    let engine = FirewallEngine::new(
        FirewallEngineConfig::from_core(&config.firewall),
        SystemExecutor::new(),
    )?;

    let report = build_status_report(&config, &engine, args.verbose).await?;
    writer.render(&report)?;

    if !report.rules_loaded {
        return Err(CliError::RulesMissing);
    }
    Ok(())
}

/// Build the status report from PID file liveness and a fresh drift check.
///
/// Only rules for the configured queue number count as loaded.
pub async fn build_status_report<E: CommandExecutor>(
    config: &NfguardConfig,
    engine: &FirewallEngine<E>,
    verbose: bool,
) -> Result<StatusReport, CliError> {
    let (daemon_running, pid) = check_daemon_status(&config.general.pid_file);
    engine.expect_queue(config.firewall.queue_num).await?;
    let drift = engine.drift_report().await;

    Ok(StatusReport {
        daemon_running,
        pid,
        queue_num: config.firewall.queue_num,
        rules_loaded: drift.is_some_and(|d| d.rules_present()),
        listing_failed: drift.is_none(),
        rules: if verbose {
            drift.map(|d| rule_rows(&d)).unwrap_or_default()
        } else {
            Vec::new()
        },
    })
}

fn rule_rows(report: &DriftReport) -> Vec<RuleRow> {
    let mut rows = vec![
        RuleRow::new("connection-redirect", report.connection_redirect),
        RuleRow::new("drop-marked", report.drop_marked),
    ];
    if let Some(dns) = report.dns_redirect {
        rows.push(RuleRow::new("dns-redirect", dns));
    }
    rows
}

/// Check if daemon is running by reading PID file and checking process existence.
fn check_daemon_status(pid_file: &str) -> (bool, Option<u32>) {
    if pid_file.is_empty() {
        return (false, None);
    }
    let pid_path = Path::new(pid_file);

    if !pid_path.exists() {
        debug!(pid_file, "pid file does not exist");
        return (false, None);
    }

    let pid_content = match std::fs::read_to_string(pid_path) {
        Ok(content) => content,
        Err(e) => {
            warn!(pid_file, error = %e, "failed to read pid file");
            return (false, None);
        }
    };

    let pid = match pid_content.trim().parse::<u32>() {
        Ok(p) => p,
        Err(e) => {
            warn!(pid_file, error = %e, "failed to parse pid");
            return (false, None);
        }
    };

    (is_process_alive(pid), Some(pid))
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use std::io::ErrorKind;

    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };

    // SAFETY: kill(2) with signal 0 is safe and does not affect the target process
    let result = unsafe { libc::kill(pid, 0) };

    if result == 0 {
        true
    } else {
        // Process exists but we can't signal it
        std::io::Error::last_os_error().kind() == ErrorKind::PermissionDenied
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    warn!("process liveness check not supported on this platform");
    false
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub daemon_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub queue_num: u16,
    pub rules_loaded: bool,
    /// A table listing failed, so presence could not be determined.
    pub listing_failed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleRow>,
}

#[derive(Debug, Serialize)]
pub struct RuleRow {
    pub name: &'static str,
    pub ipv4: bool,
    pub ipv6: bool,
}

impl RuleRow {
    fn new(name: &'static str, presence: RulePresence) -> Self {
        Self {
            name,
            ipv4: presence.ipv4,
            ipv6: presence.ipv6,
        }
    }
}

impl Render for StatusReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        match (self.daemon_running, self.pid) {
            (true, Some(pid)) => writeln!(w, "Daemon: {} (pid {})", "running".green().bold(), pid)?,
            _ => writeln!(w, "Daemon: {}", "not running".red().bold())?,
        }

        let rules = if self.rules_loaded {
            "loaded".green().bold()
        } else if self.listing_failed {
            "unknown (listing failed)".yellow().bold()
        } else {
            "missing".red().bold()
        };
        writeln!(w, "Rules:  {} (queue {})", rules, self.queue_num)?;

        if !self.rules.is_empty() {
            writeln!(w)?;
            writeln!(w, "{:<22} {:<6} IPv6", "Rule", "IPv4")?;
            writeln!(w, "{}", "-".repeat(36))?;
            for row in &self.rules {
                writeln!(w, "{:<22} {:<6} {}", row.name, mark(row.ipv4), mark(row.ipv6))?;
            }
        }

        Ok(())
    }
}

fn mark(present: bool) -> colored::ColoredString {
    use colored::Colorize;

    if present { "yes".green() } else { "no".red() }
}
