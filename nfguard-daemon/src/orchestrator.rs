//! Daemon orchestration -- rule installation, reconciliation, and shutdown.
//!
//! The [`Orchestrator`] is the central coordinator of `nfguard-daemon`.
//! It owns the shared [`FirewallEngine`], installs the interception rules,
//! runs the reconciliation loop in the background, and tears everything
//! down on SIGTERM/SIGINT.
//!
//! # Startup Order
//!
//! 1. PID file
//! 2. Interception rules (DNS redirect if enabled, connection redirect, drop on mark)
//! 3. Reconciliation loop
//! 4. Uptime metric updater (if metrics are enabled)
//!
//! # Shutdown Order
//!
//! 1. Stop the reconciliation loop and wait for it to exit
//! 2. Stop background tasks
//! 3. Remove the interception rules (if `remove_rules_on_exit`)
//! 4. Remove the PID file

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::broadcast;

use nfguard_core::config::NfguardConfig;
use nfguard_firewall::{CommandExecutor, FirewallEngine, FirewallEngineConfig, SystemExecutor};

use crate::metrics_server;

/// The main daemon orchestrator.
pub struct Orchestrator<E: CommandExecutor = SystemExecutor> {
    /// Loaded and validated configuration.
    config: NfguardConfig,
    /// Shared rule engine.
    engine: Arc<FirewallEngine<E>>,
    /// Shutdown broadcast sender (signals background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator<SystemExecutor> {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = NfguardConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration using the system executor.
    ///
    /// Validation happens once in [`with_executor`](Orchestrator::with_executor);
    /// the Prometheus recorder is installed afterwards when `[metrics] enabled = true`.
    pub fn build_from_config(config: NfguardConfig) -> Result<Self> {
        let orchestrator = Self::with_executor(config, SystemExecutor::new())?;

        if orchestrator.config.metrics.enabled {
            metrics_server::install_metrics_recorder(&orchestrator.config.metrics)?;
            record_daemon_metrics();
        }

        Ok(orchestrator)
    }
}

impl<E: CommandExecutor> Orchestrator<E> {
    /// Build with a custom command executor.
    ///
    /// This is the single place the configuration is validated.
    pub fn with_executor(config: NfguardConfig, executor: E) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let engine_config = FirewallEngineConfig::from_core(&config.firewall);
        let engine = FirewallEngine::new(engine_config, executor)
            .map_err(|e| anyhow::anyhow!("failed to build firewall engine: {}", e))?;
        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(
            queue_num = config.firewall.queue_num,
            check_interval_secs = config.firewall.check_interval_secs,
            queue_dns = config.firewall.queue_dns,
            monitor_dns_rule = config.firewall.monitor_dns_rule,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            engine: Arc::new(engine),
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Install rules, run until SIGTERM/SIGINT, then clean up.
    ///
    /// Writes the PID file first and removes it on every exit path.
    pub async fn run(&mut self) -> Result<()> {
        let pid_path = (!self.config.general.pid_file.is_empty())
            .then(|| self.config.general.pid_file.clone());

        if let Some(path) = &pid_path {
            write_pid_file(Path::new(path))?;
        }

        let result = self.run_until(wait_for_shutdown_signal()).await;

        if let Some(path) = &pid_path {
            remove_pid_file(Path::new(path));
        }

        result
    }

    /// Install rules and keep them reconciled until `shutdown` resolves.
    ///
    /// If installation fails the partially installed rules are rolled back
    /// and the error is returned without starting the loop.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let firewall = &self.config.firewall;

        self.engine
            .install_rules(firewall.queue_num, firewall.queue_dns)
            .await
            .map_err(|e| anyhow::anyhow!("failed to install interception rules: {}", e))?;

        let loop_engine = Arc::clone(&self.engine);
        let queue_num = firewall.queue_num;
        let reconcile_task =
            tokio::spawn(async move { loop_engine.start_reconciliation(queue_num).await });

        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        tracing::info!("nfguard-daemon running");
        let signal = shutdown.await;
        match &signal {
            Ok(name) => tracing::info!(signal = name, "shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "failed waiting for shutdown signal"),
        }

        self.engine.stop_reconciliation();
        match reconcile_task.await {
            Ok(Ok(())) => tracing::debug!("reconciliation task finished"),
            Ok(Err(e)) => tracing::error!(error = %e, "reconciliation task failed"),
            Err(e) => tracing::error!(error = %e, "reconciliation task panicked"),
        }

        let _ = self.shutdown_tx.send(());
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        if firewall.remove_rules_on_exit {
            if let Err(e) = self
                .engine
                .remove_rules(firewall.queue_num, firewall.queue_dns)
                .await
            {
                tracing::warn!(error = %e, "failed to remove some interception rules");
            }
        } else {
            tracing::info!("leaving interception rules installed");
        }

        signal.map(|_| ())
    }

    /// Shared rule engine.
    pub fn engine(&self) -> &Arc<FirewallEngine<E>> {
        &self.engine
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &NfguardConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file
/// - Verifies the created file is a regular file
/// - Creates the parent directory with mode 0o700 and the file with 0o600
///
/// # Errors
///
/// Returns an error if the file already exists or cannot be written.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Record daemon build info. Called once after the recorder is installed.
fn record_daemon_metrics() {
    use nfguard_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use nfguard_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
