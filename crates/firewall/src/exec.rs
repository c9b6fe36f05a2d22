//! Command execution abstraction for testability.
//!
//! The [`CommandExecutor`] trait abstracts running `iptables` / `ip6tables`,
//! allowing production code to use [`SystemExecutor`] while tests use a recording mock.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐
//! │ FirewallEngine │
//! └───────┬────────┘
//!         │
//!         ▼
//!  ┌────────────────┐
//!  │CommandExecutor │ (trait)
//!  └────────────────┘
//!       │      │
//!       ▼      ▼
//!  ┌──────┐ ┌────┐
//!  │System│ │Mock│
//!  └──┬───┘ └────┘
//!     │
//!     ▼
//!  iptables / ip6tables
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::error::FirewallError;

/// Trait abstracting invocation of the packet-filter tools.
///
/// The trait is `Send + Sync + 'static`, allowing the engine to be shared across tasks.
/// Implementations do not serialize calls themselves; mutual exclusion is the
/// engine's responsibility.
///
/// # Errors
///
/// Returns [`FirewallError::Execution`] if the tool cannot be spawned or exits non-zero.
pub trait CommandExecutor: Send + Sync + 'static {
    /// Runs `tool` with `args` and returns its standard output.
    fn exec(
        &self,
        tool: &str,
        args: &[String],
    ) -> impl Future<Output = Result<String, FirewallError>> + Send;
}

impl<T: CommandExecutor> CommandExecutor for Arc<T> {
    fn exec(
        &self,
        tool: &str,
        args: &[String],
    ) -> impl Future<Output = Result<String, FirewallError>> + Send {
        (**self).exec(tool, args)
    }
}

/// Production executor that spawns the tool as a child process.
///
/// Standard output is returned lossily decoded as UTF-8. A non-zero exit status is
/// mapped to an error carrying the trimmed standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    /// Creates a new system executor.
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for SystemExecutor {
    async fn exec(&self, tool: &str, args: &[String]) -> Result<String, FirewallError> {
        debug!(tool, args = %args.join(" "), "executing");

        let output = tokio::process::Command::new(tool)
            .args(args)
            .output()
            .await
            .map_err(|e| FirewallError::Execution {
                tool: tool.to_owned(),
                command: args.join(" "),
                reason: format!("failed to spawn: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FirewallError::Execution {
                tool: tool.to_owned(),
                command: args.join(" "),
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
