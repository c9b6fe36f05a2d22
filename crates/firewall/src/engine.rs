//! 방화벽 엔진 -- 규칙 적용, 드리프트 탐지, 재조정 루프의 소유자
//!
//! [`FirewallEngine`]은 데몬 시작 시 한 번 생성되어 `Arc`로 공유됩니다.
//! 모든 규칙 변경과 테이블 조회는 엔진이 소유한 단일 잠금 아래에서 수행되므로
//! 동시에 진행 중인 `iptables`/`ip6tables` 호출은 항상 하나 이하입니다.
//!
//! # 내부 아키텍처
//! ```text
//! ReconcileLoop ──> drift_report() ──read──┐
//!      │                                   ├── Mutex<Expectations> ──> CommandExecutor
//!      └──────────> apply_rule()  ──write──┘
//! ```
//!
//! 기대 패턴([`Expectations`])도 같은 잠금 안에 있어
//! 패턴 갱신과 규칙 변경의 순서가 항상 일치합니다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nfguard_core::metrics as m;

use crate::config::FirewallEngineConfig;
use crate::detector::{DriftReport, Expectations, Listing, TableSnapshot};
use crate::error::FirewallError;
use crate::exec::CommandExecutor;
use crate::reconcile;
use crate::rules::{self, Action, BuiltRule, RuleSpec};

/// 방화벽 규칙 동기화 엔진
///
/// # 사용 예시
/// ```no_run
/// # async fn example() -> Result<(), nfguard_firewall::FirewallError> {
/// use std::sync::Arc;
/// use nfguard_firewall::{FirewallEngine, FirewallEngineConfig, SystemExecutor};
///
/// let engine = Arc::new(FirewallEngine::new(
///     FirewallEngineConfig::default(),
///     SystemExecutor::new(),
/// )?);
///
/// engine.install_rules(0, true).await?;
///
/// let loop_engine = Arc::clone(&engine);
/// let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });
///
/// // ... 종료 시
/// engine.stop_reconciliation();
/// # let _ = task.await;
/// # Ok(())
/// # }
/// ```
pub struct FirewallEngine<E: CommandExecutor> {
    /// 엔진 설정
    config: FirewallEngineConfig,
    /// 외부 도구 실행기
    executor: E,
    /// 규칙 변경/조회 직렬화 잠금 (기대 패턴 포함)
    expectations: Mutex<Expectations>,
    /// 재조정 루프 정지 토큰
    cancel: StdMutex<CancelState>,
    /// 재조정 루프 실행 여부
    running: AtomicBool,
}

impl<E: CommandExecutor> FirewallEngine<E> {
    /// 새 엔진을 생성합니다.
    ///
    /// 기대 패턴은 큐 번호와 무관하게 매치하는 상태로 시작하며,
    /// 규칙이 처음 빌드될 때 해당 큐 번호로 갱신됩니다.
    pub fn new(config: FirewallEngineConfig, executor: E) -> Result<Self, FirewallError> {
        config.validate()?;
        Ok(Self {
            config,
            executor,
            expectations: Mutex::new(Expectations::compile(None)?),
            cancel: StdMutex::new(CancelState::default()),
            running: AtomicBool::new(false),
        })
    }

    /// 엔진 설정을 반환합니다.
    pub fn config(&self) -> &FirewallEngineConfig {
        &self.config
    }

    /// 재조정 루프가 실행 중인지 여부
    pub fn is_reconciling(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 규칙 하나를 IPv4, IPv6 순서로 적용합니다.
    ///
    /// `enable == false`이면 `action`과 무관하게 삭제(`-D`)로 적용됩니다.
    /// IPv4 적용이 실패하면 IPv6는 시도하지 않습니다. 부분 적용은 되돌리지 않으며
    /// 다음 재조정 주기에 수렴합니다.
    pub async fn apply_rule(
        &self,
        action: Action,
        enable: bool,
        spec: &RuleSpec,
    ) -> Result<(), FirewallError> {
        let _guard = self.expectations.lock().await;
        self.apply_locked(action, enable, spec).await
    }

    /// DNS 응답 리다이렉트 규칙을 추가하거나 삭제합니다.
    pub async fn enable_dns_queueing(&self, enable: bool, queue_num: u16) -> Result<(), FirewallError> {
        let rule = rules::dns_redirect(queue_num);
        let mut expectations = self.expectations.lock().await;
        expectations.update_dns(&rule.expectation)?;
        self.apply_built_locked(&rule, enable).await
    }

    /// 신규 연결 리다이렉트 규칙을 추가하거나 삭제합니다.
    ///
    /// 드리프트 탐지 패턴은 이 호출의 큐 번호로 갱신됩니다.
    pub async fn enable_connection_queueing(
        &self,
        enable: bool,
        queue_num: u16,
    ) -> Result<(), FirewallError> {
        let rule = rules::connection_redirect(queue_num);
        let mut expectations = self.expectations.lock().await;
        expectations.update_connection(&rule.expectation)?;
        self.apply_built_locked(&rule, enable).await
    }

    /// 마크 패킷 차단 규칙을 추가하거나 삭제합니다.
    pub async fn enable_drop_on_mark(&self, enable: bool) -> Result<(), FirewallError> {
        let rule = rules::drop_marked();
        let _guard = self.expectations.lock().await;
        self.apply_built_locked(&rule, enable).await
    }

    /// 인터셉션 규칙 전체를 설치합니다.
    ///
    /// DNS(선택), 신규 연결, 차단 순서로 적용하며, 하나라도 실패하면
    /// 시도한 규칙을 모두 되돌리고 최초 에러를 반환합니다.
    pub async fn install_rules(&self, queue_num: u16, queue_dns: bool) -> Result<(), FirewallError> {
        info!(queue_num, queue_dns, "installing interception rules");

        let result = async {
            if queue_dns {
                self.enable_dns_queueing(true, queue_num).await?;
            }
            self.enable_connection_queueing(true, queue_num).await?;
            self.enable_drop_on_mark(true).await
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "rule installation failed, rolling back");
            // 롤백 중 실패는 설치되지 않은 규칙 삭제이므로 무시
            let _ = self.remove_rules(queue_num, queue_dns).await;
            return Err(e);
        }

        info!(queue_num, "interception rules installed");
        Ok(())
    }

    /// 인터셉션 규칙 전체를 삭제합니다.
    ///
    /// 모든 규칙에 대해 삭제를 시도하고, 실패가 있으면 첫 번째 에러를 반환합니다.
    pub async fn remove_rules(&self, queue_num: u16, queue_dns: bool) -> Result<(), FirewallError> {
        let mut first_error = None;

        let mut record = |result: Result<(), FirewallError>| {
            if let Err(e) = result {
                debug!(error = %e, "rule removal failed");
                first_error.get_or_insert(e);
            }
        };

        record(self.enable_drop_on_mark(false).await);
        record(self.enable_connection_queueing(false, queue_num).await);
        if queue_dns {
            record(self.enable_dns_queueing(false, queue_num).await);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(queue_num, "interception rules removed");
                Ok(())
            }
        }
    }

    /// 현재 테이블을 조회하여 규칙별 존재 여부를 반환합니다.
    ///
    /// 조회가 하나라도 실패하면 `None`을 반환합니다.
    /// 조회 순서는 테이블별로 IPv4, IPv6가 번갈아 수행됩니다.
    pub async fn drift_report(&self) -> Option<DriftReport> {
        let expectations = self.expectations.lock().await;

        let mut v4 = TableSnapshot::default();
        let mut v6 = TableSnapshot::default();

        for listing in Listing::required(self.config.monitor_dns_rule) {
            let args: Vec<String> = listing.args().iter().map(|a| (*a).to_owned()).collect();
            for (tool, snapshot) in [
                (self.config.iptables_bin.as_str(), &mut v4),
                (self.config.ip6tables_bin.as_str(), &mut v6),
            ] {
                match self.executor.exec(tool, &args).await {
                    Ok(output) => snapshot.record(listing, output),
                    Err(e) => {
                        debug!(tool, error = %e, "table listing failed");
                        metrics::counter!(m::FIREWALL_LISTING_FAILURES_TOTAL, m::LABEL_TOOL => tool.to_owned())
                            .increment(1);
                        return None;
                    }
                }
            }
        }

        Some(expectations.evaluate(&v4, &v6))
    }

    /// 기대 규칙이 모두 존재하는지 판정합니다.
    ///
    /// 조회 실패 시 `false`를 반환합니다.
    pub async fn are_rules_loaded(&self) -> bool {
        let loaded = self
            .drift_report()
            .await
            .is_some_and(|report| report.rules_present());

        let verdict = if loaded { "present" } else { "missing" };
        metrics::counter!(m::FIREWALL_DRIFT_CHECKS_TOTAL, m::LABEL_RESULT => verdict).increment(1);
        metrics::gauge!(m::FIREWALL_RULES_LOADED).set(if loaded { 1.0 } else { 0.0 });

        loaded
    }

    /// 드리프트 탐지 패턴을 주어진 큐 번호로 고정합니다.
    ///
    /// 규칙을 직접 빌드하지 않은 엔진(상태 조회, 재조정 전용)이
    /// 다른 큐 번호의 규칙을 정상으로 판정하지 않도록 합니다.
    pub async fn expect_queue(&self, queue_num: u16) -> Result<(), FirewallError> {
        let mut expectations = self.expectations.lock().await;
        expectations.update_connection(&rules::connection_pattern(Some(queue_num)))?;
        expectations.update_dns(&rules::dns_pattern(Some(queue_num)))?;
        debug!(queue_num, "drift expectations pinned to queue");
        Ok(())
    }

    /// 재조정 루프를 실행합니다. 정지될 때까지 반환하지 않습니다.
    ///
    /// 드리프트 탐지 패턴은 `queue_num`으로 고정된 뒤 시작합니다.
    /// 첫 점검은 시작 후 한 주기가 지난 뒤 수행됩니다.
    /// 이미 실행 중이면 [`FirewallError::AlreadyRunning`]을 반환합니다.
    ///
    /// 한 번도 소비되지 않은 정지 요청(루프 시작 전에 도착한 요청)은
    /// 다음 시작 시 즉시 반영됩니다. 이전 루프를 이미 정지시킨 요청은
    /// 다시 반영되지 않습니다.
    pub async fn start_reconciliation(&self, queue_num: u16) -> Result<(), FirewallError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(FirewallError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        self.expect_queue(queue_num).await?;

        let token = self.cancel_state().arm();
        if token.is_cancelled() {
            warn!("pending stop request consumed, reconciliation not started");
        }
        reconcile::run(self, queue_num, token).await;
        Ok(())
    }

    /// 재조정 루프에 정지를 요청합니다.
    ///
    /// 여러 번 호출하거나 루프가 없을 때 호출해도 블로킹되지 않습니다.
    /// 점검이나 복구가 진행 중이면 해당 작업이 끝난 뒤 정지합니다.
    pub fn stop_reconciliation(&self) {
        debug!("reconciliation stop requested");
        self.cancel_state().token.cancel();
    }

    fn cancel_state(&self) -> MutexGuard<'_, CancelState> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn apply_built_locked(&self, rule: &BuiltRule, enable: bool) -> Result<(), FirewallError> {
        debug!(rule = %rule.kind, enable, "applying rule");
        self.apply_locked(rule.action, enable, &rule.spec).await
    }

    /// 잠금을 보유한 상태에서 호출해야 합니다.
    async fn apply_locked(
        &self,
        action: Action,
        enable: bool,
        spec: &RuleSpec,
    ) -> Result<(), FirewallError> {
        let action = if enable { action } else { Action::Delete };
        let args = spec.to_args(action);

        for tool in [&self.config.iptables_bin, &self.config.ip6tables_bin] {
            let result = self.executor.exec(tool, &args).await;
            let outcome = if result.is_ok() { "success" } else { "failure" };
            metrics::counter!(
                m::FIREWALL_RULE_MUTATIONS_TOTAL,
                m::LABEL_ACTION => action.action_type_name(),
                m::LABEL_RESULT => outcome
            )
            .increment(1);
            result?;
        }

        debug!(action = %action, rule = %spec, "rule applied");
        Ok(())
    }
}

/// 정지 토큰과 해당 토큰이 루프에 전달되었는지 여부
#[derive(Default)]
struct CancelState {
    token: CancellationToken,
    consumed: bool,
}

impl CancelState {
    /// 새 루프에 전달할 토큰을 반환합니다.
    ///
    /// 이전 루프가 사용한 토큰은 새 토큰으로 교체하고,
    /// 아직 어떤 루프에도 전달되지 않은 토큰은 정지 여부와 관계없이 그대로 넘깁니다.
    fn arm(&mut self) -> CancellationToken {
        if self.consumed {
            self.token = CancellationToken::new();
        }
        self.consumed = true;
        self.token.clone()
    }
}

/// 루프 종료 시 실행 플래그를 해제합니다.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
