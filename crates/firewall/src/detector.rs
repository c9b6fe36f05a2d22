//! 드리프트 탐지
//!
//! `iptables -L` / `ip6tables -L` 출력에서 기대 규칙이 존재하는지 정규식으로 확인합니다.
//! 매칭은 규칙 전체 문자열이 아니라 구분 필드(타깃, 상태 키워드, 큐 번호, 마크 값)에 고정되어
//! 공백이나 컬럼 폭 차이에 영향을 받지 않습니다.
//!
//! 실제 조회는 [`FirewallEngine::drift_report`](crate::engine::FirewallEngine::drift_report)가
//! 잠금 안에서 수행하고, 이 모듈은 조회 결과를 판정하는 순수 로직만 담당합니다.

use regex::Regex;
use serde::Serialize;

use crate::error::FirewallError;
use crate::rules::{self, ExpectationPattern};

/// 드리프트 점검 시 조회하는 테이블/체인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    /// filter 테이블 OUTPUT 체인 (차단 규칙)
    FilterOutput,
    /// mangle 테이블 OUTPUT 체인 (신규 연결 리다이렉트)
    MangleOutput,
    /// filter 테이블 INPUT 체인 (DNS 리다이렉트)
    FilterInput,
}

impl Listing {
    /// 조회 명령 인자를 반환합니다.
    pub fn args(&self) -> &'static [&'static str] {
        match self {
            Self::FilterOutput => &["-L", "OUTPUT"],
            Self::MangleOutput => &["-L", "OUTPUT", "-t", "mangle"],
            Self::FilterInput => &["-L", "INPUT"],
        }
    }

    /// 점검에 필요한 조회 목록을 반환합니다.
    ///
    /// DNS 규칙 감시가 켜져 있으면 INPUT 체인 조회가 추가됩니다.
    pub fn required(monitor_dns: bool) -> Vec<Listing> {
        let mut listings = vec![Self::FilterOutput, Self::MangleOutput];
        if monitor_dns {
            listings.push(Self::FilterInput);
        }
        listings
    }
}

/// 한 주소 체계(IPv4 또는 IPv6)의 조회 결과
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    /// `-L OUTPUT` 출력
    pub filter_output: String,
    /// `-L OUTPUT -t mangle` 출력
    pub mangle_output: String,
    /// `-L INPUT` 출력 (DNS 규칙 감시 시에만)
    pub filter_input: Option<String>,
}

impl TableSnapshot {
    /// 조회 결과를 해당 필드에 기록합니다.
    pub fn record(&mut self, listing: Listing, output: String) {
        match listing {
            Listing::FilterOutput => self.filter_output = output,
            Listing::MangleOutput => self.mangle_output = output,
            Listing::FilterInput => self.filter_input = Some(output),
        }
    }
}

/// 규칙별, 주소 체계별 존재 여부
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RulePresence {
    /// iptables 조회에서 발견
    pub ipv4: bool,
    /// ip6tables 조회에서 발견
    pub ipv6: bool,
}

impl RulePresence {
    /// 양쪽 모두 존재하는지 여부
    pub fn both(&self) -> bool {
        self.ipv4 && self.ipv6
    }
}

/// 드리프트 점검 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// 신규 연결 리다이렉트 규칙
    pub connection_redirect: RulePresence,
    /// 마크 패킷 차단 규칙
    pub drop_marked: RulePresence,
    /// DNS 리다이렉트 규칙 (감시하지 않으면 `None`)
    pub dns_redirect: Option<RulePresence>,
}

impl DriftReport {
    /// 감시 대상 규칙이 모두 존재하는지 판정합니다.
    pub fn rules_present(&self) -> bool {
        self.connection_redirect.both()
            && self.drop_marked.both()
            && self.dns_redirect.is_none_or(|dns| dns.both())
    }
}

/// 드리프트 탐지용 컴파일된 패턴 집합
///
/// 규칙 빌더가 반환한 [`ExpectationPattern`]으로 갱신됩니다.
/// 초기값은 큐 번호와 무관하게 매치하는 패턴입니다.
#[derive(Debug, Clone)]
pub struct Expectations {
    connection: Regex,
    drop: Regex,
    dns: Regex,
}

impl Expectations {
    /// 주어진 큐 번호로 패턴을 컴파일합니다.
    pub fn compile(queue_num: Option<u16>) -> Result<Self, FirewallError> {
        Ok(Self {
            connection: compile_pattern(&rules::connection_pattern(queue_num))?,
            drop: compile_pattern(&rules::drop_pattern())?,
            dns: compile_pattern(&rules::dns_pattern(queue_num))?,
        })
    }

    /// 신규 연결 리다이렉트 패턴을 교체합니다.
    pub fn update_connection(&mut self, pattern: &ExpectationPattern) -> Result<(), FirewallError> {
        self.connection = compile_pattern(pattern)?;
        Ok(())
    }

    /// DNS 리다이렉트 패턴을 교체합니다.
    pub fn update_dns(&mut self, pattern: &ExpectationPattern) -> Result<(), FirewallError> {
        self.dns = compile_pattern(pattern)?;
        Ok(())
    }

    /// 현재 신규 연결 리다이렉트 패턴 원문
    pub fn connection_pattern(&self) -> &str {
        self.connection.as_str()
    }

    /// IPv4/IPv6 조회 결과를 판정합니다.
    pub fn evaluate(&self, v4: &TableSnapshot, v6: &TableSnapshot) -> DriftReport {
        let dns_redirect = match (&v4.filter_input, &v6.filter_input) {
            (Some(input4), Some(input6)) => Some(RulePresence {
                ipv4: self.dns.is_match(input4),
                ipv6: self.dns.is_match(input6),
            }),
            _ => None,
        };

        DriftReport {
            connection_redirect: RulePresence {
                ipv4: self.connection.is_match(&v4.mangle_output),
                ipv6: self.connection.is_match(&v6.mangle_output),
            },
            drop_marked: RulePresence {
                ipv4: self.drop.is_match(&v4.filter_output),
                ipv6: self.drop.is_match(&v6.filter_output),
            },
            dns_redirect,
        }
    }
}

fn compile_pattern(pattern: &ExpectationPattern) -> Result<Regex, FirewallError> {
    Regex::new(pattern.as_str()).map_err(|e| FirewallError::Pattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
