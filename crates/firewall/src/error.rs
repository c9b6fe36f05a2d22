//! 방화벽 크레이트 에러 타입
//!
//! [`FirewallError`]는 규칙 설치/제거, 테이블 조회, 재조정 루프에서 발생하는 에러를 표현합니다.
//! `From<FirewallError> for NfguardError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use nfguard_core::error::{ConfigError, FirewallRuleError, NfguardError};

/// 방화벽 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum FirewallError {
    /// 외부 도구 실행 실패 (실행 불가 또는 0이 아닌 종료 코드)
    ///
    /// IPv4 적용은 성공했지만 IPv6 적용이 실패한 부분 적용도 이 variant로 보고되며,
    /// `tool` 필드로 어느 쪽에서 실패했는지 구분합니다.
    #[error("'{tool} {command}' failed: {reason}")]
    Execution {
        /// 실행한 도구 (iptables, ip6tables)
        tool: String,
        /// 도구에 전달한 인자 (공백 구분)
        command: String,
        /// 실패 사유
        reason: String,
    },

    /// 기대 패턴 컴파일 실패
    #[error("invalid expectation pattern '{pattern}': {reason}")]
    Pattern {
        /// 문제가 된 정규식
        pattern: String,
        /// 컴파일 에러
        reason: String,
    },

    /// 재조정 루프가 이미 실행 중
    #[error("reconciliation loop already running")]
    AlreadyRunning,

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl From<FirewallError> for NfguardError {
    fn from(err: FirewallError) -> Self {
        match err {
            FirewallError::Execution { tool, reason, .. } => {
                NfguardError::Firewall(FirewallRuleError::Execution { tool, reason })
            }
            FirewallError::AlreadyRunning => NfguardError::Firewall(FirewallRuleError::AlreadyRunning),
            FirewallError::Config { field, reason } => {
                NfguardError::Config(ConfigError::InvalidValue { field, reason })
            }
            FirewallError::Pattern { .. } => {
                NfguardError::Firewall(FirewallRuleError::Other(err.to_string()))
            }
        }
    }
}
