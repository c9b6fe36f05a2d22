//! `nfguard install` / `nfguard remove` command handlers

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use nfguard_core::config::NfguardConfig;
use nfguard_firewall::{CommandExecutor, FirewallEngine, FirewallEngineConfig, SystemExecutor};

use crate::cli::RuleArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Whether a rule change installs or removes the interception rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleChange {
    Install,
    Remove,
}

/// Execute the `install` or `remove` command against the system binaries.
pub async fn execute(
    change: RuleChange,
    args: RuleArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = NfguardConfig::load(config_path).await?;
    let engine = FirewallEngine::new(
        FirewallEngineConfig::from_core(&config.firewall),
        SystemExecutor::new(),
    )?;

    let report = run_with(change, &args, &config, &engine).await?;
    writer.render(&report)?;
    Ok(())
}

/// Apply a rule change through the given engine.
///
/// Command-line flags override the queue number and DNS selection from the
/// configuration.
pub async fn run_with<E: CommandExecutor>(
    change: RuleChange,
    args: &RuleArgs,
    config: &NfguardConfig,
    engine: &FirewallEngine<E>,
) -> Result<RuleChangeReport, CliError> {
    let queue_num = args.queue_num.unwrap_or(config.firewall.queue_num);
    let queue_dns = config.firewall.queue_dns && !args.no_dns;

    info!(?change, queue_num, queue_dns, "applying rule change");

    match change {
        RuleChange::Install => engine.install_rules(queue_num, queue_dns).await?,
        RuleChange::Remove => engine.remove_rules(queue_num, queue_dns).await?,
    }

    let mut rules = vec!["connection-redirect", "drop-marked"];
    if queue_dns {
        rules.insert(0, "dns-redirect");
    }

    Ok(RuleChangeReport {
        change,
        queue_num,
        rules,
    })
}

#[derive(Debug, Serialize)]
pub struct RuleChangeReport {
    pub change: RuleChange,
    pub queue_num: u16,
    pub rules: Vec<&'static str>,
}

impl Render for RuleChangeReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let verb = match self.change {
            RuleChange::Install => "Installed".green().bold(),
            RuleChange::Remove => "Removed".yellow().bold(),
        };
        writeln!(w, "{} interception rules (queue {})", verb, self.queue_num)?;
        for rule in &self.rules {
            writeln!(w, "  - {}", rule)?;
        }
        Ok(())
    }
}
