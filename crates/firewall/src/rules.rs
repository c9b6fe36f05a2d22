//! 규칙 빌더
//!
//! 인터셉션에 필요한 세 가지 규칙의 토큰 시퀀스를 생성합니다.
//! 모든 함수는 순수 함수이며, 같은 토큰이 iptables/ip6tables 양쪽에 그대로 사용됩니다.
//!
//! | 규칙 | 기본 액션 | 토큰 |
//! |------|-----------|------|
//! | DNS 응답 리다이렉트 | `-I` | `INPUT --protocol udp --sport 53 -j NFQUEUE --queue-num <q> --queue-bypass` |
//! | 신규 연결 리다이렉트 | `-A` | `OUTPUT -t mangle -m conntrack --ctstate NEW -j NFQUEUE --queue-num <q> --queue-bypass` |
//! | 마크 패킷 차단 | `-A` | `OUTPUT -m mark --mark 101285 -j DROP` |
//!
//! 큐 번호에 의존하는 규칙은 토큰과 함께 드리프트 탐지용 [`ExpectationPattern`]을 반환합니다.
//! 호출자는 이 패턴을 [`Expectations`](crate::detector::Expectations)에 명시적으로 반영합니다.

use std::fmt;

use serde::Serialize;

/// 거부 대상 패킷에 붙는 마크 값
///
/// 데몬의 다른 컴포넌트가 패킷 마킹 규칙에 같은 값을 사용하므로 변경하면 안 됩니다.
pub const DROP_MARK: u32 = 0x18BA5;

/// 규칙 적용 액션
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// 체인 끝에 추가 (`-A`)
    Append,
    /// 체인 앞에 삽입 (`-I`)
    Insert,
    /// 규칙 삭제 (`-D`)
    Delete,
}

impl Action {
    /// 명령행 플래그를 반환합니다.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Insert => "-I",
            Self::Delete => "-D",
        }
    }

    /// 메트릭/로그 레이블용 이름을 반환합니다.
    pub fn action_type_name(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Insert => "insert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_type_name())
    }
}

/// 규칙 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// UDP 53 응답을 NFQUEUE로 리다이렉트
    DnsRedirect,
    /// 신규 아웃바운드 연결을 NFQUEUE로 리다이렉트
    ConnectionRedirect,
    /// [`DROP_MARK`]가 붙은 패킷 차단
    DropMarked,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DnsRedirect => "dns_redirect",
            Self::ConnectionRedirect => "connection_redirect",
            Self::DropMarked => "drop_marked",
        };
        f.write_str(name)
    }
}

/// 하나의 규칙을 나타내는 불변 토큰 시퀀스
///
/// 액션 플래그는 포함하지 않습니다. 실행 시 [`RuleSpec::to_args`]로 앞에 붙입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    tokens: Vec<String>,
}

impl RuleSpec {
    fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// 규칙 토큰을 반환합니다.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// `[action] + tokens` 형태의 인자 목록을 생성합니다.
    pub fn to_args(&self, action: Action) -> Vec<String> {
        let mut args = Vec::with_capacity(self.tokens.len() + 1);
        args.push(action.flag().to_owned());
        args.extend(self.tokens.iter().cloned());
        args
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// 드리프트 탐지기가 테이블 조회 결과에서 찾을 정규식 원문
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationPattern(String);

impl ExpectationPattern {
    #[cfg(test)]
    pub(crate) fn from_raw(pattern: &str) -> Self {
        Self(pattern.to_owned())
    }

    /// 정규식 원문을 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExpectationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 빌드된 규칙: 토큰과 기본 액션, 탐지 패턴
#[derive(Debug, Clone)]
pub struct BuiltRule {
    /// 규칙 종류
    pub kind: RuleKind,
    /// 활성화 시 사용할 액션
    pub action: Action,
    /// 규칙 토큰
    pub spec: RuleSpec,
    /// 이 규칙을 조회 결과에서 찾기 위한 패턴
    pub expectation: ExpectationPattern,
}

/// DNS 응답 리다이렉트 규칙을 생성합니다.
pub fn dns_redirect(queue_num: u16) -> BuiltRule {
    let queue = queue_num.to_string();
    BuiltRule {
        kind: RuleKind::DnsRedirect,
        action: Action::Insert,
        spec: RuleSpec::from_tokens([
            "INPUT",
            "--protocol",
            "udp",
            "--sport",
            "53",
            "-j",
            "NFQUEUE",
            "--queue-num",
            queue.as_str(),
            "--queue-bypass",
        ]),
        expectation: dns_pattern(Some(queue_num)),
    }
}

/// 신규 연결 리다이렉트 규칙을 생성합니다.
pub fn connection_redirect(queue_num: u16) -> BuiltRule {
    let queue = queue_num.to_string();
    BuiltRule {
        kind: RuleKind::ConnectionRedirect,
        action: Action::Append,
        spec: RuleSpec::from_tokens([
            "OUTPUT",
            "-t",
            "mangle",
            "-m",
            "conntrack",
            "--ctstate",
            "NEW",
            "-j",
            "NFQUEUE",
            "--queue-num",
            queue.as_str(),
            "--queue-bypass",
        ]),
        expectation: connection_pattern(Some(queue_num)),
    }
}

/// 마크 패킷 차단 규칙을 생성합니다.
pub fn drop_marked() -> BuiltRule {
    let mark = DROP_MARK.to_string();
    BuiltRule {
        kind: RuleKind::DropMarked,
        action: Action::Append,
        spec: RuleSpec::from_tokens(["OUTPUT", "-m", "mark", "--mark", mark.as_str(), "-j", "DROP"]),
        expectation: drop_pattern(),
    }
}

/// 신규 연결 리다이렉트 규칙의 탐지 패턴
///
/// `None`이면 큐 번호와 무관하게 매치합니다 (아직 규칙을 빌드하지 않은 상태).
pub fn connection_pattern(queue_num: Option<u16>) -> ExpectationPattern {
    ExpectationPattern(format!(
        r"NFQUEUE\s.*\bctstate\s+NEW\b.*\bNFQUEUE num\s+{}\s+bypass",
        queue_fragment(queue_num)
    ))
}

/// 마크 패킷 차단 규칙의 탐지 패턴
///
/// iptables는 마크를 소문자 16진수로 출력합니다 (`mark match 0x18ba5`).
pub fn drop_pattern() -> ExpectationPattern {
    ExpectationPattern(format!(r"DROP\s.*\bmark match\s+{DROP_MARK:#x}\b"))
}

/// DNS 응답 리다이렉트 규칙의 탐지 패턴
///
/// 포트는 서비스 이름(`domain`) 또는 숫자(`53`, `-n` 사용 시)로 출력될 수 있습니다.
pub fn dns_pattern(queue_num: Option<u16>) -> ExpectationPattern {
    ExpectationPattern(format!(
        r"NFQUEUE\s.*\budp spt:(?:domain|53)\b.*\bNFQUEUE num\s+{}\s+bypass",
        queue_fragment(queue_num)
    ))
}

fn queue_fragment(queue_num: Option<u16>) -> String {
    match queue_num {
        Some(q) => q.to_string(),
        None => r"\d+".to_owned(),
    }
}
