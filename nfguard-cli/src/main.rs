//! nfguard -- command-line front end for the interception rules.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nfguard_cli::cli::{Cli, Commands};
use nfguard_cli::commands::{self, rules::RuleChange};
use nfguard_cli::error::CliError;
use nfguard_cli::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_deref());

    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    let config_path = cli.config.as_path();

    match cli.command {
        Commands::Status(args) => commands::status::execute(args, config_path, &writer).await,
        Commands::Install(args) => {
            commands::rules::execute(RuleChange::Install, args, config_path, &writer).await
        }
        Commands::Remove(args) => {
            commands::rules::execute(RuleChange::Remove, args, config_path, &writer).await
        }
        Commands::Config(args) => commands::config::execute(args, config_path, &writer).await,
    }
}

/// Logs go to stderr so stdout stays clean for `--output json`.
fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    // 이미 초기화된 경우는 무시
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
