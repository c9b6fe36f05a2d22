//! 에러 타입: 도메인별 에러 정의

/// nfguard 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum NfguardError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 방화벽 규칙 동기화 에러
    #[error("firewall error: {0}")]
    Firewall(#[from] FirewallRuleError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 방화벽 규칙 에러
///
/// `nfguard-firewall` 크레이트의 도메인 에러가 상위 레이어로 전파될 때 사용됩니다.
#[derive(Debug, thiserror::Error)]
pub enum FirewallRuleError {
    /// iptables/ip6tables 실행 실패
    #[error("command '{tool}' failed: {reason}")]
    Execution { tool: String, reason: String },

    /// 재조정 루프가 이미 실행 중
    #[error("reconciliation already running")]
    AlreadyRunning,

    /// 기타 규칙 처리 에러
    #[error("{0}")]
    Other(String),
}
