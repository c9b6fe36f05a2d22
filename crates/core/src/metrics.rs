//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `nfguard_`
//! - 모듈명: `firewall_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (gauge/latency), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 규칙 액션 레이블 키 (append, insert, delete)
pub const LABEL_ACTION: &str = "action";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 도구 레이블 키 (iptables, ip6tables)
pub const LABEL_TOOL: &str = "tool";

// ─── Firewall 메트릭 ───────────────────────────────────────────────

/// Firewall: 규칙 변경 시도 수 (counter, labels: action, result)
pub const FIREWALL_RULE_MUTATIONS_TOTAL: &str = "nfguard_firewall_rule_mutations_total";

/// Firewall: 드리프트 점검 수 (counter, label: result = present/missing)
pub const FIREWALL_DRIFT_CHECKS_TOTAL: &str = "nfguard_firewall_drift_checks_total";

/// Firewall: 테이블 조회 실패 수 (counter, label: tool)
pub const FIREWALL_LISTING_FAILURES_TOTAL: &str = "nfguard_firewall_listing_failures_total";

/// Firewall: 복구 사이클 수 (counter)
pub const FIREWALL_REPAIRS_TOTAL: &str = "nfguard_firewall_repairs_total";

/// Firewall: 복구 중 실패한 단계 수 (counter)
pub const FIREWALL_REPAIR_FAILURES_TOTAL: &str = "nfguard_firewall_repair_failures_total";

/// Firewall: 마지막 점검 시 규칙 존재 여부 (gauge, 1 = loaded)
pub const FIREWALL_RULES_LOADED: &str = "nfguard_firewall_rules_loaded";

// ─── Daemon 메트릭 ────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, label: version)
pub const DAEMON_BUILD_INFO: &str = "nfguard_daemon_build_info";

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "nfguard_daemon_uptime_seconds";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        FIREWALL_RULE_MUTATIONS_TOTAL,
        "Total number of rule mutations attempted against iptables/ip6tables"
    );
    describe_counter!(
        FIREWALL_DRIFT_CHECKS_TOTAL,
        "Total number of drift checks, labeled by verdict"
    );
    describe_counter!(
        FIREWALL_LISTING_FAILURES_TOTAL,
        "Total number of table listings that failed during drift checks"
    );
    describe_counter!(
        FIREWALL_REPAIRS_TOTAL,
        "Total number of disable/enable repair cycles started"
    );
    describe_counter!(
        FIREWALL_REPAIR_FAILURES_TOTAL,
        "Total number of failed enable steps during repair cycles"
    );
    describe_gauge!(
        FIREWALL_RULES_LOADED,
        "Whether the interception rules were present at the last check (1/0)"
    );

    describe_gauge!(DAEMON_BUILD_INFO, "Daemon build information");
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
}
