//! 방화벽 엔진 설정
//!
//! [`FirewallEngineConfig`]는 core의 [`FirewallConfig`](nfguard_core::config::FirewallConfig)를
//! 기반으로 엔진이 실제로 사용하는 설정만 추려서 제공합니다.
//!
//! # 사용 예시
//! ```
//! use nfguard_core::config::NfguardConfig;
//! use nfguard_firewall::config::FirewallEngineConfig;
//!
//! let core_config = NfguardConfig::default();
//! let config = FirewallEngineConfig::from_core(&core_config.firewall);
//! assert_eq!(config.check_interval_secs, 5);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FirewallError;

/// 기본 재조정 주기 (초)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5;

/// 재조정 주기 상한 (초)
const MAX_CHECK_INTERVAL_SECS: u64 = 3600;

/// 방화벽 엔진 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallEngineConfig {
    /// IPv4 도구 경로
    pub iptables_bin: String,
    /// IPv6 도구 경로
    pub ip6tables_bin: String,
    /// 재조정 주기 (초)
    pub check_interval_secs: u64,
    /// DNS 리다이렉트 규칙도 드리프트 점검/복구 대상에 포함할지 여부
    pub monitor_dns_rule: bool,
}

impl Default for FirewallEngineConfig {
    fn default() -> Self {
        Self {
            iptables_bin: "iptables".to_owned(),
            ip6tables_bin: "ip6tables".to_owned(),
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            monitor_dns_rule: false,
        }
    }
}

impl FirewallEngineConfig {
    /// core의 `FirewallConfig`에서 엔진 설정을 생성합니다.
    pub fn from_core(core: &nfguard_core::config::FirewallConfig) -> Self {
        Self {
            iptables_bin: core.iptables_bin.clone(),
            ip6tables_bin: core.ip6tables_bin.clone(),
            check_interval_secs: core.check_interval_secs,
            monitor_dns_rule: core.monitor_dns_rule,
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FirewallError> {
        if self.check_interval_secs == 0 || self.check_interval_secs > MAX_CHECK_INTERVAL_SECS {
            return Err(FirewallError::Config {
                field: "check_interval_secs".to_owned(),
                reason: format!("must be 1-{MAX_CHECK_INTERVAL_SECS}"),
            });
        }

        if self.iptables_bin.trim().is_empty() {
            return Err(FirewallError::Config {
                field: "iptables_bin".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.ip6tables_bin.trim().is_empty() {
            return Err(FirewallError::Config {
                field: "ip6tables_bin".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        Ok(())
    }

    /// 재조정 주기를 `Duration`으로 반환합니다.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// 방화벽 엔진 설정 빌더
#[derive(Default)]
pub struct FirewallEngineConfigBuilder {
    config: FirewallEngineConfig,
}

impl FirewallEngineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// IPv4 도구 경로를 설정합니다.
    pub fn iptables_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.iptables_bin = bin.into();
        self
    }

    /// IPv6 도구 경로를 설정합니다.
    pub fn ip6tables_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.ip6tables_bin = bin.into();
        self
    }

    /// 재조정 주기(초)를 설정합니다.
    pub fn check_interval_secs(mut self, secs: u64) -> Self {
        self.config.check_interval_secs = secs;
        self
    }

    /// DNS 규칙 감시 여부를 설정합니다.
    pub fn monitor_dns_rule(mut self, monitor: bool) -> Self {
        self.config.monitor_dns_rule = monitor;
        self
    }

    /// 설정을 검증하고 `FirewallEngineConfig`를 생성합니다.
    pub fn build(self) -> Result<FirewallEngineConfig, FirewallError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
