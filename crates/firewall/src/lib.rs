//! nfguard 방화벽 크레이트
//!
//! NFQUEUE 가로채기에 필요한 iptables/ip6tables 규칙을 설치하고,
//! 다른 프로세스가 테이블을 비웠을 때 이를 감지해 다시 설치합니다.
//!
//! # 모듈 구성
//! - [`rules`]: 세 가지 규칙(DNS 응답, 신규 연결, 마크 패킷 차단)의 토큰 빌더
//! - [`detector`]: 테이블 조회 결과에 대한 드리프트 판정
//! - [`engine`]: 단일 잠금 아래의 규칙 적용과 조회, 재조정 루프 생명주기
//! - [`reconcile`]: 주기적 점검 및 복구 루프
//! - [`exec`]: 외부 도구 실행 추상화

pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod exec;
pub mod reconcile;
pub mod rules;

pub use config::{DEFAULT_CHECK_INTERVAL_SECS, FirewallEngineConfig, FirewallEngineConfigBuilder};
pub use detector::{DriftReport, Expectations, Listing, RulePresence, TableSnapshot};
pub use engine::FirewallEngine;
pub use error::FirewallError;
pub use exec::{CommandExecutor, SystemExecutor};
pub use reconcile::RepairStep;
pub use rules::{Action, BuiltRule, DROP_MARK, ExpectationPattern, RuleKind, RuleSpec};
