//! 통합 테스트 -- 드리프트 감지와 재조정 루프
//!
//! 규칙을 실제로 저장하고 `-L` 출력을 흉내내는 가짜 방화벽을 사용하여
//! 테이블 초기화 → 드리프트 감지 → 복구 시나리오를 검증합니다.

use std::sync::Arc;
use std::time::Duration;

use nfguard_firewall::{FirewallEngine, FirewallEngineConfig, FirewallError};

mod sim {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use nfguard_firewall::{CommandExecutor, FirewallError};

    /// 호출 기록
    #[derive(Debug, Clone)]
    pub struct Call {
        pub tool: String,
        pub args: Vec<String>,
    }

    impl Call {
        pub fn is_listing(&self) -> bool {
            self.args.first().is_some_and(|a| a == "-L")
        }
    }

    /// 체인별 규칙을 보관하는 가짜 iptables/ip6tables
    #[derive(Default)]
    pub struct SimulatedFirewall {
        chains: Mutex<HashMap<String, Vec<Vec<String>>>>,
        calls: Mutex<Vec<Call>>,
        fail_listings: Mutex<bool>,
    }

    impl SimulatedFirewall {
        pub fn new() -> Self {
            Self::default()
        }

        /// 모든 테이블을 비웁니다 (`iptables -F` 상당).
        pub fn flush(&self) {
            self.chains.lock().unwrap().clear();
        }

        /// 한 도구의 테이블만 비웁니다.
        pub fn flush_tool(&self, tool: &str) {
            let prefix = format!("{tool}/");
            self.chains
                .lock()
                .unwrap()
                .retain(|key, _| !key.starts_with(&prefix));
        }

        pub fn set_fail_listings(&self, fail: bool) {
            *self.fail_listings.lock().unwrap() = fail;
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn mutations(&self) -> Vec<Call> {
            self.calls().into_iter().filter(|c| !c.is_listing()).collect()
        }

        pub fn clear_calls(&self) {
            self.calls.lock().unwrap().clear();
        }

        pub fn rule_count(&self, tool: &str, table: &str, chain: &str) -> usize {
            self.chains
                .lock()
                .unwrap()
                .get(&chain_key(tool, table, chain))
                .map_or(0, Vec::len)
        }

        fn handle(&self, tool: &str, args: &[String]) -> Result<String, String> {
            let (flag, rest) = args.split_first().ok_or("no arguments")?;
            let (chain, rest) = rest.split_first().ok_or("no chain")?;
            let (table, rule) = match rest {
                [t, table, rule @ ..] if t == "-t" => (table.as_str(), rule.to_vec()),
                rule => ("filter", rule.to_vec()),
            };
            let key = chain_key(tool, table, chain);
            let mut chains = self.chains.lock().unwrap();

            match flag.as_str() {
                "-A" => {
                    chains.entry(key).or_default().push(rule);
                    Ok(String::new())
                }
                "-I" => {
                    chains.entry(key).or_default().insert(0, rule);
                    Ok(String::new())
                }
                "-D" => {
                    let rules = chains.entry(key).or_default();
                    match rules.iter().position(|r| *r == rule) {
                        Some(pos) => {
                            rules.remove(pos);
                            Ok(String::new())
                        }
                        None => Err(
                            "Bad rule (does a matching rule exist in that chain?)".to_owned()
                        ),
                    }
                }
                "-L" => {
                    if *self.fail_listings.lock().unwrap() {
                        return Err("can't initialize iptables table".to_owned());
                    }
                    let mut out = format!(
                        "Chain {chain} (policy ACCEPT)\ntarget     prot opt source               destination\n"
                    );
                    for rule in chains.get(&key).map(Vec::as_slice).unwrap_or_default() {
                        out.push_str(&render(rule));
                        out.push('\n');
                    }
                    Ok(out)
                }
                other => Err(format!("unknown option \"{other}\"")),
            }
        }
    }

    impl CommandExecutor for SimulatedFirewall {
        async fn exec(&self, tool: &str, args: &[String]) -> Result<String, FirewallError> {
            self.calls.lock().unwrap().push(Call {
                tool: tool.to_owned(),
                args: args.to_vec(),
            });
            tokio::task::yield_now().await;
            self.handle(tool, args).map_err(|reason| FirewallError::Execution {
                tool: tool.to_owned(),
                command: args.join(" "),
                reason,
            })
        }
    }

    fn chain_key(tool: &str, table: &str, chain: &str) -> String {
        format!("{tool}/{table}/{chain}")
    }

    fn value_after<'a>(rule: &'a [String], flag: &str) -> Option<&'a str> {
        rule.iter()
            .position(|t| t == flag)
            .and_then(|i| rule.get(i + 1))
            .map(String::as_str)
    }

    /// 규칙 토큰을 `iptables -L` 형식의 한 줄로 변환합니다.
    fn render(rule: &[String]) -> String {
        let queue = value_after(rule, "--queue-num").unwrap_or("0");
        if value_after(rule, "--ctstate") == Some("NEW") {
            format!(
                "NFQUEUE    all  --  anywhere             anywhere             ctstate NEW NFQUEUE num {queue} bypass"
            )
        } else if let Some(mark) = value_after(rule, "--mark") {
            let mark: u32 = mark.parse().unwrap_or_default();
            format!("DROP       all  --  anywhere             anywhere             mark match {mark:#x}")
        } else if value_after(rule, "--sport") == Some("53") {
            format!(
                "NFQUEUE    udp  --  anywhere             anywhere             udp spt:domain NFQUEUE num {queue} bypass"
            )
        } else {
            rule.join(" ")
        }
    }
}

use sim::SimulatedFirewall;

fn setup(config: FirewallEngineConfig) -> (Arc<FirewallEngine<Arc<SimulatedFirewall>>>, Arc<SimulatedFirewall>) {
    let firewall = Arc::new(SimulatedFirewall::new());
    let engine = FirewallEngine::new(config, Arc::clone(&firewall)).expect("engine");
    (Arc::new(engine), firewall)
}

fn mutation_summary(firewall: &SimulatedFirewall, tool: &str) -> Vec<String> {
    firewall
        .mutations()
        .into_iter()
        .filter(|c| c.tool == tool)
        .map(|c| c.args.join(" "))
        .collect()
}

#[tokio::test]
async fn installed_rules_are_detected() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());
    assert!(!engine.are_rules_loaded().await);

    engine.install_rules(0, true).await.unwrap();
    assert!(engine.are_rules_loaded().await);
    assert_eq!(firewall.rule_count("iptables", "mangle", "OUTPUT"), 1);
    assert_eq!(firewall.rule_count("ip6tables", "filter", "OUTPUT"), 1);
    assert_eq!(firewall.rule_count("ip6tables", "filter", "INPUT"), 1);
}

#[tokio::test]
async fn removed_rules_are_not_detected() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());
    engine.install_rules(0, false).await.unwrap();
    engine.remove_rules(0, false).await.unwrap();

    assert!(!engine.are_rules_loaded().await);
    assert_eq!(firewall.rule_count("iptables", "mangle", "OUTPUT"), 0);
}

#[tokio::test]
async fn disabling_never_enabled_rule_surfaces_tool_error() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());
    let err = engine.enable_drop_on_mark(false).await.unwrap_err();
    match err {
        FirewallError::Execution { tool, reason, .. } => {
            assert_eq!(tool, "iptables");
            assert!(reason.contains("Bad rule"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // IPv4 실패 후 IPv6는 시도하지 않음
    assert_eq!(firewall.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn flushed_tables_are_repaired_within_one_period() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());
    engine.install_rules(0, false).await.unwrap();
    firewall.flush();
    firewall.clear_calls();

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });

    // 첫 점검은 한 주기 뒤
    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert!(firewall.calls().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        mutation_summary(&firewall, "iptables"),
        vec![
            "-D OUTPUT -t mangle -m conntrack --ctstate NEW -j NFQUEUE --queue-num 0 --queue-bypass",
            "-D OUTPUT -m mark --mark 101285 -j DROP",
            "-A OUTPUT -t mangle -m conntrack --ctstate NEW -j NFQUEUE --queue-num 0 --queue-bypass",
            "-A OUTPUT -m mark --mark 101285 -j DROP",
        ]
    );
    assert!(engine.are_rules_loaded().await);

    // 복구 이후 주기에서는 추가 변경 없음
    let mutations = firewall.mutations().len();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(firewall.mutations().len(), mutations);

    engine.stop_reconciliation();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn partial_flush_converges_without_duplicates() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());
    engine.install_rules(0, false).await.unwrap();
    firewall.flush_tool("ip6tables");

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    for tool in ["iptables", "ip6tables"] {
        assert_eq!(firewall.rule_count(tool, "mangle", "OUTPUT"), 1, "{tool}");
        assert_eq!(firewall.rule_count(tool, "filter", "OUTPUT"), 1, "{tool}");
    }
    assert!(engine.are_rules_loaded().await);

    engine.stop_reconciliation();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn listing_failure_triggers_repair() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());
    engine.install_rules(0, false).await.unwrap();
    firewall.set_fail_listings(true);
    firewall.clear_calls();

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    // 조회 실패는 규칙 누락으로 간주되어 복구가 수행됨
    assert_eq!(firewall.mutations().len(), 8);
    assert_eq!(firewall.rule_count("iptables", "mangle", "OUTPUT"), 1);

    engine.stop_reconciliation();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn dns_rule_monitoring_repairs_input_chain() {
    let config = FirewallEngineConfig {
        monitor_dns_rule: true,
        ..Default::default()
    };
    let (engine, firewall) = setup(config);
    engine.install_rules(0, true).await.unwrap();
    firewall.flush();
    firewall.clear_calls();

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    let summary = mutation_summary(&firewall, "iptables");
    assert_eq!(summary.len(), 6);
    assert!(summary[0].starts_with("-D INPUT"));
    assert!(summary[5].starts_with("-I INPUT"));
    assert_eq!(firewall.rule_count("ip6tables", "filter", "INPUT"), 1);
    assert!(engine.are_rules_loaded().await);

    engine.stop_reconciliation();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_while_waiting_makes_no_further_calls() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.stop_reconciliation();
    task.await.unwrap().unwrap();
    assert!(!engine.is_reconciling());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(firewall.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_engine_restarts() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());

    // 루프가 없을 때의 정지 요청은 블로킹되지 않고 다음 시작에서 소비됨
    engine.stop_reconciliation();
    engine.stop_reconciliation();
    engine.start_reconciliation(0).await.unwrap();
    assert!(firewall.calls().is_empty());

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert!(firewall.calls().iter().any(|c| c.is_listing()));

    engine.stop_reconciliation();
    engine.stop_reconciliation();
    task.await.unwrap().unwrap();
    assert!(!engine.is_reconciling());
}

#[tokio::test(start_paused = true)]
async fn custom_interval_is_honored() {
    let config = FirewallEngineConfig {
        check_interval_secs: 30,
        ..Default::default()
    };
    let (engine, firewall) = setup(config);

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(firewall.calls().is_empty());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!firewall.calls().is_empty());

    engine.stop_reconciliation();
    task.await.unwrap().unwrap();
}

fn engine_on(firewall: &Arc<SimulatedFirewall>) -> Arc<FirewallEngine<Arc<SimulatedFirewall>>> {
    let engine = FirewallEngine::new(FirewallEngineConfig::default(), Arc::clone(firewall))
        .expect("engine");
    Arc::new(engine)
}

#[tokio::test]
async fn fresh_engine_rejects_rules_for_another_queue() {
    let (installer, firewall) = setup(FirewallEngineConfig::default());
    installer.install_rules(0, false).await.unwrap();

    let observer = engine_on(&firewall);
    observer.expect_queue(3).await.unwrap();
    assert!(!observer.are_rules_loaded().await);

    observer.expect_queue(0).await.unwrap();
    assert!(observer.are_rules_loaded().await);
}

#[tokio::test(start_paused = true)]
async fn reconciliation_repairs_rule_for_wrong_queue() {
    let (installer, firewall) = setup(FirewallEngineConfig::default());
    installer.install_rules(0, false).await.unwrap();
    firewall.clear_calls();

    let engine = engine_on(&firewall);
    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(3).await });

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    engine.stop_reconciliation();
    task.await.unwrap().unwrap();

    let appended = mutation_summary(&firewall, "iptables");
    assert!(
        appended
            .iter()
            .any(|c| c.starts_with("-A OUTPUT -t mangle") && c.contains("--queue-num 3")),
        "queue 3 rule should be appended: {appended:?}"
    );
    assert_eq!(firewall.rule_count("iptables", "mangle", "OUTPUT"), 2);
    assert!(engine.are_rules_loaded().await);
}

#[tokio::test(start_paused = true)]
async fn repeated_stop_after_exit_does_not_cancel_next_run() {
    let (engine, firewall) = setup(FirewallEngineConfig::default());

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.stop_reconciliation();
    task.await.unwrap().unwrap();

    // 이미 종료된 루프에 대한 중복 정지 요청
    engine.stop_reconciliation();

    let loop_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move { loop_engine.start_reconciliation(0).await });
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert!(engine.is_reconciling());
    assert!(firewall.calls().iter().any(|c| c.is_listing()));

    engine.stop_reconciliation();
    task.await.unwrap().unwrap();
}
