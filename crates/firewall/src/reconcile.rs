//! 재조정 루프
//!
//! 일정 주기마다 드리프트를 점검하고, 규칙이 사라졌으면 삭제 후 재설치로 복구합니다.
//!
//! ```text
//! Idle ──start──> Waiting ──tick──> Checking ──present──> Waiting
//!                    │                  │
//!                    │               missing
//!                    │                  ▼
//!                    │              Repairing ──────────> Waiting
//!                    │
//!                  stop ──> Stopped
//! ```
//!
//! 점검과 복구는 하나의 틱 안에서 끝까지 수행되며, 그 사이의 정지 요청은
//! 작업이 끝난 뒤 반영됩니다. 밀린 틱은 건너뜁니다.

use std::fmt;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nfguard_core::metrics as m;

use crate::engine::FirewallEngine;
use crate::exec::CommandExecutor;

/// 복구 사이클의 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStep {
    /// DNS 리다이렉트 규칙 삭제
    DisableDns,
    /// 신규 연결 리다이렉트 규칙 삭제
    DisableConnection,
    /// 차단 규칙 삭제
    DisableDrop,
    /// 신규 연결 리다이렉트 규칙 추가
    EnableConnection,
    /// 차단 규칙 추가
    EnableDrop,
    /// DNS 리다이렉트 규칙 추가
    EnableDns,
}

impl RepairStep {
    /// 복구 순서를 반환합니다.
    ///
    /// 중복 규칙이 쌓이지 않도록 삭제를 먼저 수행합니다.
    /// DNS 규칙 감시가 켜져 있으면 DNS 삭제가 가장 먼저, DNS 추가가 가장 나중에 수행됩니다.
    pub fn plan(monitor_dns: bool) -> Vec<RepairStep> {
        let mut steps = Vec::with_capacity(6);
        if monitor_dns {
            steps.push(Self::DisableDns);
        }
        steps.extend([
            Self::DisableConnection,
            Self::DisableDrop,
            Self::EnableConnection,
            Self::EnableDrop,
        ]);
        if monitor_dns {
            steps.push(Self::EnableDns);
        }
        steps
    }

    fn is_enable(&self) -> bool {
        matches!(
            self,
            Self::EnableConnection | Self::EnableDrop | Self::EnableDns
        )
    }
}

impl fmt::Display for RepairStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DisableDns => "disable_dns",
            Self::DisableConnection => "disable_connection",
            Self::DisableDrop => "disable_drop",
            Self::EnableConnection => "enable_connection",
            Self::EnableDrop => "enable_drop",
            Self::EnableDns => "enable_dns",
        };
        f.write_str(name)
    }
}

/// 정지될 때까지 재조정 루프를 실행합니다.
pub(crate) async fn run<E: CommandExecutor>(
    engine: &FirewallEngine<E>,
    queue_num: u16,
    cancel: CancellationToken,
) {
    let period = engine.config().check_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        queue_num,
        interval_secs = period.as_secs(),
        "reconciliation loop started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("reconciliation loop stopped");
                break;
            }
            _ = ticker.tick() => {
                if engine.are_rules_loaded().await {
                    debug!("interception rules present");
                    continue;
                }
                warn!(queue_num, "interception rules missing, reloading");
                let failures = repair(engine, queue_num).await;
                if failures == 0 {
                    info!(queue_num, "interception rules reloaded");
                }
            }
        }
    }
}

/// 복구 사이클을 한 번 수행하고 실패한 추가 단계 수를 반환합니다.
///
/// 앞 단계가 실패해도 모든 단계를 시도합니다. 삭제 실패는 규칙이 이미 없는 경우가
/// 대부분이므로 debug로만 기록합니다.
pub async fn repair<E: CommandExecutor>(engine: &FirewallEngine<E>, queue_num: u16) -> usize {
    metrics::counter!(m::FIREWALL_REPAIRS_TOTAL).increment(1);

    let mut failures = 0;
    for step in RepairStep::plan(engine.config().monitor_dns_rule) {
        let result = match step {
            RepairStep::DisableDns => engine.enable_dns_queueing(false, queue_num).await,
            RepairStep::DisableConnection => {
                engine.enable_connection_queueing(false, queue_num).await
            }
            RepairStep::DisableDrop => engine.enable_drop_on_mark(false).await,
            RepairStep::EnableConnection => engine.enable_connection_queueing(true, queue_num).await,
            RepairStep::EnableDrop => engine.enable_drop_on_mark(true).await,
            RepairStep::EnableDns => engine.enable_dns_queueing(true, queue_num).await,
        };

        if let Err(e) = result {
            if step.is_enable() {
                failures += 1;
                metrics::counter!(m::FIREWALL_REPAIR_FAILURES_TOTAL).increment(1);
                warn!(step = %step, error = %e, "repair step failed");
            } else {
                debug!(step = %step, error = %e, "repair step failed");
            }
        }
    }
    failures
}
