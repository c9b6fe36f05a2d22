//! Orchestrator lifecycle tests.
//!
//! Drives `run_until` with a recording executor in place of the real
//! iptables binaries and checks install, reconcile, and teardown behavior.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use nfguard_core::config::NfguardConfig;
use nfguard_daemon::orchestrator::Orchestrator;
use nfguard_firewall::{CommandExecutor, FirewallError};

/// Records every invocation and fails those matching a configured prefix.
#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<String>>,
    fail_prefix: Option<String>,
}

impl RecordingExecutor {
    fn failing(prefix: &str) -> Self {
        Self {
            fail_prefix: Some(prefix.to_owned()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandExecutor for RecordingExecutor {
    async fn exec(&self, tool: &str, args: &[String]) -> Result<String, FirewallError> {
        let line = format!("{} {}", tool, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());
        match &self.fail_prefix {
            Some(prefix) if line.starts_with(prefix.as_str()) => Err(FirewallError::Execution {
                tool: tool.to_owned(),
                command: args.join(" "),
                reason: "exit status: 1".to_owned(),
            }),
            _ => Ok(String::new()),
        }
    }
}

fn test_config() -> NfguardConfig {
    let mut config = NfguardConfig::default();
    config.general.pid_file = String::new();
    config
}

#[tokio::test]
async fn installs_then_removes_rules() {
    let executor = Arc::new(RecordingExecutor::default());
    let orchestrator = Orchestrator::with_executor(test_config(), Arc::clone(&executor)).unwrap();

    orchestrator.run_until(async { Ok("TEST") }).await.unwrap();

    let calls = executor.calls();
    let first: Vec<&str> = calls.iter().take(6).map(String::as_str).collect();
    assert!(first[0].starts_with("iptables -I INPUT"));
    assert!(first[1].starts_with("ip6tables -I INPUT"));
    assert!(first[2].starts_with("iptables -A OUTPUT -t mangle"));
    assert!(first[4].starts_with("iptables -A OUTPUT -m mark --mark 101285"));

    let deletes = calls.iter().filter(|c| c.contains(" -D ")).count();
    assert_eq!(deletes, 6);
    assert!(!orchestrator.engine().is_reconciling());
}

#[tokio::test]
async fn skips_dns_rule_when_disabled() {
    let executor = Arc::new(RecordingExecutor::default());
    let mut config = test_config();
    config.firewall.queue_dns = false;
    let orchestrator = Orchestrator::with_executor(config, Arc::clone(&executor)).unwrap();

    orchestrator.run_until(async { Ok("TEST") }).await.unwrap();

    assert!(executor.calls().iter().all(|c| !c.contains("INPUT")));
}

#[tokio::test]
async fn keeps_rules_when_configured() {
    let executor = Arc::new(RecordingExecutor::default());
    let mut config = test_config();
    config.firewall.remove_rules_on_exit = false;
    let orchestrator = Orchestrator::with_executor(config, Arc::clone(&executor)).unwrap();

    orchestrator.run_until(async { Ok("TEST") }).await.unwrap();

    assert!(executor.calls().iter().all(|c| !c.contains(" -D ")));
}

#[tokio::test]
async fn install_failure_rolls_back_and_errors() {
    let executor = Arc::new(RecordingExecutor::failing("ip6tables -A OUTPUT -m mark"));
    let orchestrator = Orchestrator::with_executor(test_config(), Arc::clone(&executor)).unwrap();

    let err = orchestrator
        .run_until(async { Ok("TEST") })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to install"));

    let calls = executor.calls();
    assert!(calls.iter().any(|c| c.starts_with("iptables -D OUTPUT -m mark")));
    assert!(calls.iter().any(|c| c.starts_with("iptables -D INPUT")));
    assert!(!orchestrator.engine().is_reconciling());
}

#[tokio::test(start_paused = true)]
async fn reconciles_while_running() {
    let executor = Arc::new(RecordingExecutor::default());
    let orchestrator = Orchestrator::with_executor(test_config(), Arc::clone(&executor)).unwrap();

    orchestrator
        .run_until(async {
            tokio::time::sleep(Duration::from_millis(5_100)).await;
            Ok("TEST")
        })
        .await
        .unwrap();

    // 빈 조회 결과는 규칙 누락이므로 한 번의 점검과 복구가 수행됨
    let calls = executor.calls();
    assert!(calls.iter().any(|c| c == "iptables -L OUTPUT -t mangle"));
    assert!(calls.iter().filter(|c| c.contains(" -A OUTPUT -t mangle")).count() >= 4);
}

#[tokio::test]
async fn signal_error_still_cleans_up() {
    let executor = Arc::new(RecordingExecutor::default());
    let orchestrator = Orchestrator::with_executor(test_config(), Arc::clone(&executor)).unwrap();

    let result = orchestrator
        .run_until(async { Err(anyhow::anyhow!("no signal handler")) })
        .await;
    assert!(result.is_err());
    assert!(executor.calls().iter().any(|c| c.contains(" -D ")));
}

#[test]
fn rejects_invalid_config() {
    let mut config = test_config();
    config.firewall.iptables_bin = String::new();
    assert!(Orchestrator::with_executor(config, RecordingExecutor::default()).is_err());
}

#[test]
fn build_from_config_validates_before_metrics_setup() {
    let mut config = test_config();
    config.metrics.enabled = true;
    config.firewall.check_interval_secs = 0;

    let err = Orchestrator::build_from_config(config)
        .err()
        .expect("invalid config should be rejected");
    let message = err.to_string();
    assert!(message.starts_with("config validation failed"), "{message}");
    assert!(message.contains("check_interval_secs"), "{message}");
}
