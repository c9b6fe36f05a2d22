//! 설정 관리: nfguard.toml 파싱 및 런타임 설정
//!
//! [`NfguardConfig`]는 데몬과 CLI가 공유하는 최상위 설정 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`NFGUARD_FIREWALL_QUEUE_NUM=1` 형식)
//! 3. 설정 파일 (`nfguard.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), nfguard_core::error::NfguardError> {
//! use nfguard_core::config::NfguardConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = NfguardConfig::load("/etc/nfguard/nfguard.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = NfguardConfig::parse("[firewall]\nqueue_num = 2")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, NfguardError};

/// 재조정 주기 상한 (초)
const MAX_CHECK_INTERVAL_SECS: u64 = 3600;

/// nfguard 통합 설정
///
/// `nfguard.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NfguardConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 방화벽 규칙 설정
    #[serde(default)]
    pub firewall: FirewallConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl NfguardConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, NfguardError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, NfguardError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NfguardError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                NfguardError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, NfguardError> {
        toml::from_str(toml_str).map_err(|e| {
            NfguardError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `NFGUARD_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "NFGUARD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "NFGUARD_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "NFGUARD_GENERAL_PID_FILE");

        // Firewall
        override_u16(&mut self.firewall.queue_num, "NFGUARD_FIREWALL_QUEUE_NUM");
        override_u64(
            &mut self.firewall.check_interval_secs,
            "NFGUARD_FIREWALL_CHECK_INTERVAL_SECS",
        );
        override_string(
            &mut self.firewall.iptables_bin,
            "NFGUARD_FIREWALL_IPTABLES_BIN",
        );
        override_string(
            &mut self.firewall.ip6tables_bin,
            "NFGUARD_FIREWALL_IP6TABLES_BIN",
        );
        override_bool(&mut self.firewall.queue_dns, "NFGUARD_FIREWALL_QUEUE_DNS");
        override_bool(
            &mut self.firewall.monitor_dns_rule,
            "NFGUARD_FIREWALL_MONITOR_DNS_RULE",
        );
        override_bool(
            &mut self.firewall.remove_rules_on_exit,
            "NFGUARD_FIREWALL_REMOVE_RULES_ON_EXIT",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "NFGUARD_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "NFGUARD_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "NFGUARD_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), NfguardError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.firewall.check_interval_secs == 0
            || self.firewall.check_interval_secs > MAX_CHECK_INTERVAL_SECS
        {
            return Err(ConfigError::InvalidValue {
                field: "firewall.check_interval_secs".to_owned(),
                reason: format!("must be 1-{MAX_CHECK_INTERVAL_SECS}"),
            }
            .into());
        }

        if self.firewall.iptables_bin.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "firewall.iptables_bin".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        if self.firewall.ip6tables_bin.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "firewall.ip6tables_bin".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        // DNS 규칙을 감시하려면 설치도 되어 있어야 함 (그렇지 않으면 매 주기 복구 시도)
        if self.firewall.monitor_dns_rule && !self.firewall.queue_dns {
            return Err(ConfigError::InvalidValue {
                field: "firewall.monitor_dns_rule".to_owned(),
                reason: "requires firewall.queue_dns = true".to_owned(),
            }
            .into());
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "metrics.port".to_owned(),
                    reason: "must be non-zero when metrics are enabled".to_owned(),
                }
                .into());
            }
            if !self.metrics.endpoint.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "metrics.endpoint".to_owned(),
                    reason: "must start with '/'".to_owned(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 사용하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/nfguard/nfguard.pid".to_owned(),
        }
    }
}

/// 방화벽 규칙 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// NFQUEUE 큐 번호
    pub queue_num: u16,
    /// 규칙 존재 여부 점검 주기 (초)
    pub check_interval_secs: u64,
    /// IPv4 도구 경로
    pub iptables_bin: String,
    /// IPv6 도구 경로
    pub ip6tables_bin: String,
    /// DNS 응답 큐잉 규칙 설치 여부
    pub queue_dns: bool,
    /// DNS 규칙도 드리프트 감지/복구 대상에 포함할지 여부
    pub monitor_dns_rule: bool,
    /// 종료 시 규칙 제거 여부
    pub remove_rules_on_exit: bool,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            queue_num: 0,
            check_interval_secs: 5,
            iptables_bin: "iptables".to_owned(),
            ip6tables_bin: "ip6tables".to_owned(),
            queue_dns: true,
            monitor_dns_rule: false,
            remove_rules_on_exit: true,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9105,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
