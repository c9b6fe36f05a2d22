//! nfguard 공통 크레이트
//!
//! 데몬, CLI, 방화벽 크레이트가 공유하는 에러 타입, 설정, 메트릭 이름을 정의합니다.

pub mod config;
pub mod error;
pub mod metrics;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, FirewallRuleError, NfguardError};

// 설정
pub use config::{FirewallConfig, GeneralConfig, MetricsConfig, NfguardConfig};
