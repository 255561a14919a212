use crate::config::ProcessorConfig;
use crate::dispatch::decide_signal;
use crate::processor::{CompositeProcessor, ProcessInput};
use crate::{
    condition, evaluator, expr, matcher, ActionDispatcher, AlertSource, Clock, DelayQueue,
    EventPublisher, StrategyCache,
};
use async_trait::async_trait;
use oxcorr_common::types::{
    ActionInstance, ActionSignal, Alert, AlertStatus, ConditionPredicate, Connector, Detect,
    DerivedEvent, EventRecord, Item, QueryConfig, Severity, Strategy, Truth,
};
use oxcorr_store::memory::MemoryStore;
use oxcorr_store::{keys, CoordinationStore};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

const NOW: i64 = 1_700_000_000;

// ---- fixture builders ----

fn make_alert(id: &str, upstream: i64, dims: &[(&str, &str)]) -> Alert {
    let dimensions: BTreeMap<String, serde_json::Value> = dims
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    Alert {
        id: id.to_string(),
        dedupe_md5: format!("fp-{id}"),
        name: format!("告警-{upstream}"),
        strategy_id: Some(upstream),
        severity: Severity::Warning,
        status: AlertStatus::Abnormal,
        biz_id: 2,
        create_time: NOW - 120,
        update_time: NOW,
        dimensions: dimensions.clone(),
        is_no_data: false,
        is_acknowledged: false,
        is_handled: false,
        top_event: EventRecord {
            event_id: format!("ev-{id}"),
            time: NOW,
            fields: dimensions.clone(),
            tags: dimensions,
        },
    }
}

fn monitor_config(id: i64, alias: &str, upstream: i64, dims: &[&str]) -> QueryConfig {
    QueryConfig {
        id,
        alias: alias.to_string(),
        metric_id: format!("metric.{alias}"),
        data_source_label: matcher::DATA_SOURCE_MONITOR.to_string(),
        data_type_label: matcher::DATA_TYPE_ALERT.to_string(),
        agg_dimension: dims.iter().map(|d| d.to_string()).collect(),
        strategy_id: Some(upstream),
        alert_name: None,
        agg_condition: Vec::new(),
    }
}

fn fta_config(id: i64, alias: &str, alert_name: &str, dims: &[&str]) -> QueryConfig {
    QueryConfig {
        id,
        alias: alias.to_string(),
        metric_id: format!("metric.{alias}"),
        data_source_label: matcher::DATA_SOURCE_FTA.to_string(),
        data_type_label: matcher::DATA_TYPE_ALERT.to_string(),
        agg_dimension: dims.iter().map(|d| d.to_string()).collect(),
        strategy_id: None,
        alert_name: Some(alert_name.to_string()),
        agg_condition: Vec::new(),
    }
}

fn detect(level: u8, expression: &str, connector: Option<Connector>) -> Detect {
    Detect {
        level,
        expression: expression.to_string(),
        connector,
    }
}

fn composite_strategy(id: i64, name: &str, configs: Vec<QueryConfig>, detects: Vec<Detect>) -> Strategy {
    Strategy {
        id,
        biz_id: 2,
        name: name.to_string(),
        items: vec![Item {
            id: id * 10,
            name: "关联项".to_string(),
            query_configs: configs,
        }],
        detects,
    }
}

fn predicate(key: &str, method: &str, values: &[&str], connector: Option<Connector>) -> ConditionPredicate {
    ConditionPredicate {
        key: key.to_string(),
        method: method.to_string(),
        value: values.iter().map(|v| json!(v)).collect(),
        condition: connector,
    }
}

// ---- mock ports ----

struct MockAlertSource(Mutex<HashMap<String, Alert>>);

impl MockAlertSource {
    fn put(&self, alert: Alert) {
        self.0.lock().unwrap().insert(alert.id.clone(), alert);
    }
}

#[async_trait]
impl AlertSource for MockAlertSource {
    async fn get_by_key(&self, alert_key: &str) -> anyhow::Result<Option<Alert>> {
        Ok(self.0.lock().unwrap().get(alert_key).cloned())
    }

    async fn get_by_id(&self, alert_id: &str) -> anyhow::Result<Option<Alert>> {
        Ok(self.0.lock().unwrap().get(alert_id).cloned())
    }
}

struct MockStrategyCache {
    strategies: HashMap<i64, Strategy>,
    alarm_ok: bool,
}

impl MockStrategyCache {
    fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies: strategies.into_iter().map(|s| (s.id, s)).collect(),
            alarm_ok: true,
        }
    }

    fn index_for(&self, pred: impl Fn(&QueryConfig) -> bool) -> HashMap<i64, Vec<i64>> {
        let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
        for strategy in self.strategies.values() {
            if strategy.query_configs().any(&pred) {
                out.entry(strategy.biz_id).or_default().push(strategy.id);
            }
        }
        out
    }
}

#[async_trait]
impl StrategyCache for MockStrategyCache {
    async fn composite_strategy_ids_by_strategy(
        &self,
        strategy_id: i64,
    ) -> anyhow::Result<HashMap<i64, Vec<i64>>> {
        Ok(self.index_for(|c| c.strategy_id == Some(strategy_id)))
    }

    async fn composite_strategy_ids_by_alert_name(
        &self,
        alert_name: &str,
    ) -> anyhow::Result<HashMap<i64, Vec<i64>>> {
        Ok(self.index_for(|c| c.alert_name.as_deref() == Some(alert_name)))
    }

    async fn get_strategy_by_id(&self, strategy_id: i64) -> anyhow::Result<Option<Strategy>> {
        Ok(self.strategies.get(&strategy_id).cloned())
    }

    fn in_alarm_time(&self, _strategy: &Strategy) -> (bool, String) {
        if self.alarm_ok {
            (true, String::new())
        } else {
            (false, "当前处于休眠时间段".to_string())
        }
    }
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<DerivedEvent>>,
    fail: AtomicBool,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, events: Vec<DerivedEvent>) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("event bus unavailable");
        }
        self.events.lock().unwrap().extend(events);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDispatcher(Mutex<Vec<ActionInstance>>);

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, action: ActionInstance) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(action);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingQueue(Mutex<Vec<(ProcessInput, i64)>>);

#[async_trait]
impl DelayQueue for RecordingQueue {
    async fn apply_async(&self, payload: ProcessInput, countdown_secs: i64) -> anyhow::Result<()> {
        self.0.lock().unwrap().push((payload, countdown_secs));
        Ok(())
    }
}

struct FixedClock(AtomicI64);

impl FixedClock {
    fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ts(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ---- harness ----

struct Harness {
    store: Arc<MemoryStore>,
    alerts: Arc<MockAlertSource>,
    publisher: Arc<RecordingPublisher>,
    dispatcher: Arc<RecordingDispatcher>,
    queue: Arc<RecordingQueue>,
    clock: Arc<FixedClock>,
    processor: CompositeProcessor,
}

fn test_config() -> ProcessorConfig {
    ProcessorConfig {
        lock_wait_secs: 0,
        ..ProcessorConfig::default()
    }
}

fn harness_with(cache: MockStrategyCache, config: ProcessorConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let alerts = Arc::new(MockAlertSource(Mutex::new(HashMap::new())));
    let publisher = Arc::new(RecordingPublisher::default());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let queue = Arc::new(RecordingQueue::default());
    let clock = Arc::new(FixedClock(AtomicI64::new(NOW)));
    let processor = CompositeProcessor::new(
        store.clone(),
        alerts.clone(),
        Arc::new(cache),
        publisher.clone(),
        dispatcher.clone(),
        queue.clone(),
        clock.clone(),
        config,
    );
    Harness {
        store,
        alerts,
        publisher,
        dispatcher,
        queue,
        clock,
        processor,
    }
}

fn harness(strategies: Vec<Strategy>) -> Harness {
    harness_with(MockStrategyCache::new(strategies), test_config())
}

impl Harness {
    async fn feed(&self, alert: Alert) {
        self.alerts.put(alert.clone());
        self.processor
            .process(ProcessInput::new(alert.id.clone()))
            .await
            .unwrap();
    }

    fn published(&self) -> Vec<DerivedEvent> {
        self.publisher.events.lock().unwrap().clone()
    }

    fn actions(&self) -> Vec<ActionInstance> {
        self.dispatcher.0.lock().unwrap().clone()
    }

    fn retries(&self) -> Vec<(ProcessInput, i64)> {
        self.queue.0.lock().unwrap().clone()
    }
}

fn dimension_hash_for(strategy: &Strategy, alert: &Alert) -> String {
    let public = matcher::public_dimensions(strategy);
    let projection = matcher::project_dimensions(alert, &public);
    matcher::dimension_hash(&projection)
}

// ---- expression compiler ----

fn truth_ctx(entries: &[(&str, Truth)]) -> HashMap<String, Truth> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect()
}

#[test]
fn expr_and_binds_tighter_than_or() {
    let ast = expr::parse("A || B && C").unwrap();
    // A=false, B=true, C=false: false || (true && false) = false
    let ctx = truth_ctx(&[
        ("A", Truth::Normal),
        ("B", Truth::Abnormal),
        ("C", Truth::Normal),
    ]);
    assert!(!ast.eval(&ctx));
    // A=true alone is enough
    let ctx = truth_ctx(&[("A", Truth::Abnormal)]);
    assert!(ast.eval(&ctx));
}

#[test]
fn expr_parens_override_precedence() {
    let ast = expr::parse("(A || B) && C").unwrap();
    let ctx = truth_ctx(&[("A", Truth::Abnormal), ("C", Truth::Normal)]);
    assert!(!ast.eval(&ctx));
    let ctx = truth_ctx(&[("A", Truth::Abnormal), ("C", Truth::Abnormal)]);
    assert!(ast.eval(&ctx));
}

#[test]
fn expr_missing_alias_never_forces_true() {
    let ast = expr::parse("A && B").unwrap();
    let ctx = truth_ctx(&[("A", Truth::Abnormal)]);
    assert!(!ast.eval(&ctx));
}

#[test]
fn expr_no_data_behaves_like_normal() {
    let ast = expr::parse("A && B").unwrap();
    let ctx = truth_ctx(&[("A", Truth::Abnormal), ("B", Truth::NoData)]);
    assert!(!ast.eval(&ctx));

    let ast = expr::parse("A || B").unwrap();
    assert!(ast.eval(&ctx));
}

#[test]
fn expr_constants_participate() {
    let ast = expr::parse("true && A").unwrap();
    assert!(ast.eval(&truth_ctx(&[("A", Truth::Abnormal)])));
    let ast = expr::parse("false || A").unwrap();
    assert!(!ast.eval(&truth_ctx(&[("A", Truth::Normal)])));
}

#[test]
fn expr_rejects_malformed_input() {
    assert!(expr::parse("A &&").is_err());
    assert!(expr::parse("A & B").is_err());
    assert!(expr::parse("(A").is_err());
    assert!(expr::parse("").is_err());
    assert!(expr::parse("A B").is_err());
}

#[test]
fn expr_render_substitutes_names_and_keeps_grouping() {
    let ast = expr::parse("A && (B || C)").unwrap();
    let mut names = HashMap::new();
    names.insert("A".to_string(), "CPU使用率".to_string());
    assert_eq!(ast.render(&names), "CPU使用率 && (B || C)");
}

// ---- condition operators ----

#[test]
fn condition_eq_has_membership_semantics() {
    let alert = make_alert("a", 1, &[("module", "web")]);
    let preds = vec![predicate("module", "eq", &["gateway", "web"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    let preds = vec![predicate("module", "eq", &["db"], None)];
    assert!(!condition::evaluate_conditions(&preds, &alert));
}

#[test]
fn condition_neq_excludes_membership() {
    let alert = make_alert("a", 1, &[("module", "web")]);
    let preds = vec![predicate("module", "neq", &["db"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    let preds = vec![predicate("module", "neq", &["web", "db"], None)];
    assert!(!condition::evaluate_conditions(&preds, &alert));
}

#[test]
fn condition_tags_prefix_addresses_event_tags() {
    let mut alert = make_alert("a", 1, &[]);
    alert
        .top_event
        .tags
        .insert("device".to_string(), json!("eth0"));
    let preds = vec![predicate("tags.device", "eq", &["eth0"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    // Bare key does not see the tag
    let preds = vec![predicate("device", "eq", &["eth0"], None)];
    assert!(!condition::evaluate_conditions(&preds, &alert));
}

#[test]
fn condition_combination_is_left_associative() {
    // (true or true) and false = false; conventional precedence would
    // give true or (true and false) = true.
    let alert = make_alert("a", 1, &[("module", "web")]);
    let preds = vec![
        predicate("module", "eq", &["web"], None),
        predicate("module", "eq", &["web"], Some(Connector::Or)),
        predicate("module", "eq", &["db"], Some(Connector::And)),
    ];
    assert!(!condition::evaluate_conditions(&preds, &alert));
}

#[test]
fn condition_empty_sequence_is_trivially_true() {
    let alert = make_alert("a", 1, &[]);
    assert!(condition::evaluate_conditions(&[], &alert));
}

#[test]
fn condition_regex_prefix_wildcard_numeric() {
    let alert = make_alert("a", 1, &[("host", "prod-web-01"), ("usage", "93")]);

    let preds = vec![predicate("host", "reg", &["^prod-"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    let preds = vec![predicate("host", "prefix", &["prod-"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    let preds = vec![predicate("host", "wildcard", &["prod-*-01"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    let preds = vec![predicate("usage", "gt", &["90"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    let preds = vec![predicate("usage", "lte", &["90"], None)];
    assert!(!condition::evaluate_conditions(&preds, &alert));
}

#[test]
fn condition_all_variants_cover_every_observed_value() {
    let mut alert = make_alert("a", 1, &[]);
    alert
        .top_event
        .fields
        .insert("domains".to_string(), json!(["a.prod.net", "b.prod.net"]));

    let preds = vec![predicate("domains", "all contains", &["prod"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    let preds = vec![predicate("domains", "all wildcard", &["*.prod.net"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    // One stray value breaks the all-variant but not the any-variant
    alert
        .top_event
        .fields
        .insert("domains".to_string(), json!(["a.prod.net", "c.dev.net"]));
    let preds = vec![predicate("domains", "all wildcard", &["*.prod.net"], None)];
    assert!(!condition::evaluate_conditions(&preds, &alert));
    let preds = vec![predicate("domains", "wildcard", &["*.prod.net"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));

    let preds = vec![predicate("domains", "all nwildcard", &["*.stage.net"], None)];
    assert!(condition::evaluate_conditions(&preds, &alert));
}

#[test]
fn condition_unknown_operator_fails_predicate() {
    let alert = make_alert("a", 1, &[("module", "web")]);
    let preds = vec![predicate("module", "frobnicate", &["web"], None)];
    assert!(!condition::evaluate_conditions(&preds, &alert));
}

// ---- matcher ----

#[test]
fn matcher_datasource_identity() {
    let monitor = monitor_config(1, "A", 11, &["ip"]);
    let fta = fta_config(2, "B", "ping 失败", &["ip"]);

    let own = make_alert("a", 11, &[]);
    assert!(matcher::matches_datasource(&monitor, &own));

    let other = make_alert("a", 12, &[]);
    assert!(!matcher::matches_datasource(&monitor, &other));

    let mut third_party = make_alert("a", 0, &[]);
    third_party.strategy_id = None;
    third_party.name = "ping 失败".to_string();
    assert!(matcher::matches_datasource(&fta, &third_party));
    assert!(!matcher::matches_datasource(&monitor, &third_party));
}

#[test]
fn matcher_classify_keeps_one_copy_per_hash() {
    let config = monitor_config(1, "A", 11, &["ip"]);
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![config.clone(), config],
        vec![detect(3, "A", None)],
    );
    let alert = make_alert("a", 11, &[("ip", "10.0.0.1")]);
    let classified = matcher::classify(&strategy, &alert);
    assert_eq!(classified.matched.len(), 1);
    assert!(classified.unmatched.is_empty());
}

#[test]
fn matcher_unmatched_regardless_of_condition_when_datasource_differs() {
    let config = monitor_config(1, "A", 11, &["ip"]);
    let strategy = composite_strategy(100, "关联策略", vec![config], vec![detect(3, "A", None)]);
    let alert = make_alert("a", 99, &[("ip", "10.0.0.1")]);
    let classified = matcher::classify(&strategy, &alert);
    assert!(classified.matched.is_empty());
    assert_eq!(classified.unmatched.len(), 1);
}

#[test]
fn matcher_public_dimensions_is_sorted_intersection() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![
            monitor_config(1, "A", 11, &["ip", "bk_cloud_id", "module"]),
            monitor_config(2, "B", 12, &["module", "ip"]),
        ],
        vec![detect(3, "A && B", None)],
    );
    assert_eq!(
        matcher::public_dimensions(&strategy),
        vec!["ip".to_string(), "module".to_string()]
    );
}

#[test]
fn matcher_dimension_hash_equal_iff_public_values_equal() {
    let keys = vec!["ip".to_string()];
    let a = make_alert("a", 11, &[("ip", "10.0.0.1"), ("module", "web")]);
    let b = make_alert("b", 12, &[("ip", "10.0.0.1"), ("module", "db")]);
    let c = make_alert("c", 13, &[("ip", "10.0.0.2")]);

    let ha = matcher::dimension_hash(&matcher::project_dimensions(&a, &keys));
    let hb = matcher::dimension_hash(&matcher::project_dimensions(&b, &keys));
    let hc = matcher::dimension_hash(&matcher::project_dimensions(&c, &keys));
    assert_eq!(ha, hb);
    assert_ne!(ha, hc);
}

// ---- evaluator ----

#[test]
fn evaluator_and_connector_requires_every_detect() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![
            monitor_config(1, "A", 11, &["ip"]),
            monitor_config(2, "B", 12, &["ip"]),
        ],
        vec![
            detect(2, "A", Some(Connector::And)),
            detect(2, "B", Some(Connector::And)),
        ],
    );
    let ctx = truth_ctx(&[("A", Truth::Abnormal), ("B", Truth::Normal)]);
    assert_eq!(evaluator::evaluate_levels(&strategy, &ctx).get(&2), Some(&false));

    let ctx = truth_ctx(&[("A", Truth::Abnormal), ("B", Truth::Abnormal)]);
    assert_eq!(evaluator::evaluate_levels(&strategy, &ctx).get(&2), Some(&true));
}

#[test]
fn evaluator_broken_expression_keeps_and_level_false() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![monitor_config(1, "A", 11, &["ip"])],
        vec![
            detect(2, "A", Some(Connector::And)),
            detect(2, "A &&", Some(Connector::And)),
        ],
    );
    let ctx = truth_ctx(&[("A", Truth::Abnormal)]);
    assert_eq!(evaluator::evaluate_levels(&strategy, &ctx).get(&2), Some(&false));
}

#[test]
fn evaluator_or_connector_needs_any_detect() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![
            monitor_config(1, "A", 11, &["ip"]),
            monitor_config(2, "B", 12, &["ip"]),
        ],
        vec![
            detect(2, "A", Some(Connector::Or)),
            detect(2, "B", Some(Connector::Or)),
        ],
    );
    let ctx = truth_ctx(&[("A", Truth::Normal), ("B", Truth::Abnormal)]);
    assert_eq!(evaluator::evaluate_levels(&strategy, &ctx).get(&2), Some(&true));
}

#[test]
fn evaluator_connector_comes_from_last_detect_and_defaults_to_and() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![
            monitor_config(1, "A", 11, &["ip"]),
            monitor_config(2, "B", 12, &["ip"]),
        ],
        vec![
            detect(2, "A", Some(Connector::Or)),
            detect(2, "B", None),
        ],
    );
    // Last detect has no connector: the level combines with `and`.
    let ctx = truth_ctx(&[("A", Truth::Abnormal), ("B", Truth::Normal)]);
    assert_eq!(evaluator::evaluate_levels(&strategy, &ctx).get(&2), Some(&false));
}

#[test]
fn transition_recovery_wins_over_fire() {
    let current: BTreeMap<u8, bool> = [(1, true), (2, false)].into();
    let prior: BTreeMap<u8, bool> = [(1, false), (2, true)].into();
    assert_eq!(evaluator::detect_transition(&current, &prior), (Some(2), true));
}

#[test]
fn transition_fire_picks_most_severe_level_first() {
    let current: BTreeMap<u8, bool> = [(1, true), (3, true)].into();
    let prior = BTreeMap::new();
    assert_eq!(evaluator::detect_transition(&current, &prior), (Some(1), false));
}

#[test]
fn transition_no_change_emits_nothing() {
    let current: BTreeMap<u8, bool> = [(3, true)].into();
    let prior: BTreeMap<u8, bool> = [(3, true)].into();
    assert_eq!(evaluator::detect_transition(&current, &prior), (None, false));

    let all_false: BTreeMap<u8, bool> = [(3, false)].into();
    assert_eq!(
        evaluator::detect_transition(&all_false, &BTreeMap::new()),
        (None, false)
    );
}

// ---- action signal table ----

#[test]
fn signal_table_first_abnormal_and_no_data() {
    let alert = make_alert("a", 11, &[]);
    assert_eq!(
        decide_signal(None, &alert, NOW, 86400),
        Some(ActionSignal::Abnormal)
    );

    let mut no_data = alert.clone();
    no_data.is_no_data = true;
    assert_eq!(
        decide_signal(None, &no_data, NOW, 86400),
        Some(ActionSignal::NoData)
    );
}

#[test]
fn signal_table_recovered_and_closed_need_cached_state() {
    let mut alert = make_alert("a", 11, &[]);
    alert.status = AlertStatus::Recovered;
    assert_eq!(decide_signal(None, &alert, NOW, 86400), None);
    assert_eq!(
        decide_signal(Some(2), &alert, NOW, 86400),
        Some(ActionSignal::Recovered)
    );

    alert.status = AlertStatus::Closed;
    assert_eq!(
        decide_signal(Some(2), &alert, NOW, 86400),
        Some(ActionSignal::Closed)
    );
}

#[test]
fn signal_table_no_data_alert_never_recovers() {
    let mut alert = make_alert("a", 11, &[]);
    alert.is_no_data = true;
    alert.status = AlertStatus::Recovered;
    assert_eq!(decide_signal(Some(2), &alert, NOW, 86400), None);
    alert.status = AlertStatus::Closed;
    assert_eq!(decide_signal(Some(2), &alert, NOW, 86400), None);
}

#[test]
fn signal_table_ack_escalation_and_tie() {
    let mut alert = make_alert("a", 11, &[]);

    alert.is_acknowledged = true;
    assert_eq!(
        decide_signal(Some(2), &alert, NOW, 86400),
        Some(ActionSignal::Ack)
    );
    alert.is_acknowledged = false;

    // Escalation: fatal (1) beats cached warning (2)
    alert.severity = Severity::Fatal;
    assert_eq!(
        decide_signal(Some(2), &alert, NOW, 86400),
        Some(ActionSignal::Abnormal)
    );

    // A severity tie is not an escalation
    alert.severity = Severity::Warning;
    assert_eq!(decide_signal(Some(2), &alert, NOW, 86400), None);
}

#[test]
fn signal_table_unhandled_alert_refires_after_drop_window() {
    let mut alert = make_alert("a", 11, &[]);
    alert.create_time = NOW - 90_000;
    assert_eq!(
        decide_signal(Some(2), &alert, NOW, 86400),
        Some(ActionSignal::Abnormal)
    );

    alert.is_handled = true;
    assert_eq!(decide_signal(Some(2), &alert, NOW, 86400), None);
}

// ---- end-to-end scenarios ----

fn three_stream_strategy(level: u8) -> Strategy {
    composite_strategy(
        100,
        "主机综合异常",
        vec![
            monitor_config(1, "A", 11, &["ip"]),
            monitor_config(2, "B", 12, &["ip"]),
            monitor_config(3, "C", 13, &["ip"]),
        ],
        vec![detect(level, "A && B && C", Some(Connector::And))],
    )
}

#[tokio::test]
async fn composite_fire_with_and_connector() {
    let strategy = three_stream_strategy(3);
    let h = harness(vec![strategy.clone()]);

    let a1 = make_alert("a1", 11, &[("ip", "10.0.0.1")]);
    let a2 = make_alert("a2", 12, &[("ip", "10.0.0.1")]);
    let a3 = make_alert("a3", 13, &[("ip", "10.0.0.1")]);

    h.feed(a1.clone()).await;
    h.feed(a2).await;
    assert!(h.published().is_empty());

    h.feed(a3).await;
    let events = h.published();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.severity, 3);
    assert_eq!(event.status, AlertStatus::Abnormal);
    assert_eq!(event.alert_name, "主机综合异常");
    assert_eq!(event.target_type, "HOST");
    assert_eq!(event.target, "10.0.0.1|0");

    let hash = dimension_hash_for(&strategy, &a1);
    assert!(event.event_id.starts_with(&format!("{hash}.")));
    let prior = h
        .store
        .get(&keys::detect_result(100, &hash))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prior, r#"{"3":true}"#);
}

#[tokio::test]
async fn reprocessing_without_state_change_emits_nothing() {
    let strategy = three_stream_strategy(3);
    let h = harness(vec![strategy]);

    let a3 = make_alert("a3", 13, &[("ip", "10.0.0.1")]);
    h.feed(make_alert("a1", 11, &[("ip", "10.0.0.1")])).await;
    h.feed(make_alert("a2", 12, &[("ip", "10.0.0.1")])).await;
    h.feed(a3.clone()).await;
    assert_eq!(h.published().len(), 1);

    h.feed(a3).await;
    assert_eq!(h.published().len(), 1);
}

#[tokio::test]
async fn escalation_via_or_of_ands() {
    let strategy = composite_strategy(
        100,
        "双条件关联",
        vec![
            monitor_config(1, "A", 21, &["ip"]),
            monitor_config(2, "B", 22, &["ip"]),
            monitor_config(3, "C", 23, &["ip"]),
        ],
        vec![
            detect(2, "A && B", Some(Connector::And)),
            detect(2, "B && C", Some(Connector::And)),
        ],
    );
    let h = harness(vec![strategy]);

    h.feed(make_alert("a1", 21, &[("ip", "10.0.0.9")])).await;
    h.feed(make_alert("a2", 22, &[("ip", "10.0.0.9")])).await;
    // First detect true, second false: and-connector keeps level 2 false
    assert!(h.published().is_empty());

    h.feed(make_alert("a3", 23, &[("ip", "10.0.0.9")])).await;
    let events = h.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, 2);
    assert_eq!(events[0].status, AlertStatus::Abnormal);
}

#[tokio::test]
async fn recovery_publishes_closed_event_and_clears_state() {
    let strategy = three_stream_strategy(3);
    let h = harness(vec![strategy.clone()]);

    let a1 = make_alert("a1", 11, &[("ip", "10.0.0.1")]);
    h.feed(a1.clone()).await;
    h.feed(make_alert("a2", 12, &[("ip", "10.0.0.1")])).await;
    h.feed(make_alert("a3", 13, &[("ip", "10.0.0.1")])).await;
    assert_eq!(h.published().len(), 1);

    h.clock.advance(60);
    let mut recovered = a1.clone();
    recovered.status = AlertStatus::Recovered;
    recovered.update_time = NOW + 60;
    h.feed(recovered).await;

    let events = h.published();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].status, AlertStatus::Closed);
    assert_eq!(events[1].severity, 3);
    assert_eq!(events[1].description, "告警关联关系不再满足，告警已关闭");

    // The recovered primary alert also dispatched its own signal and
    // cleared the composite state for its dimension.
    assert!(h
        .actions()
        .iter()
        .any(|a| a.signal == ActionSignal::Recovered && a.alert_id == "a1"));
    let hash = dimension_hash_for(&strategy, &a1);
    assert!(h
        .store
        .get(&keys::detect_result(100, &hash))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn qos_cutoff_throttles_and_emits_one_summary() {
    let mut config = test_config();
    config.qos_threshold = 3;
    let h = harness_with(MockStrategyCache::new(Vec::new()), config);

    for i in 0..5 {
        let mut alert = make_alert(&format!("a{i}"), 77, &[]);
        alert.dedupe_md5 = "shared-fp".to_string();
        h.feed(alert).await;
    }

    let actions = h.actions();
    let normal: Vec<_> = actions.iter().filter(|a| !a.is_summary).collect();
    let summaries: Vec<_> = actions.iter().filter(|a| a.is_summary).collect();
    assert_eq!(normal.len(), 3);
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].qos_window_key.is_some());

    // Throttled alerts had their first-fire markers deleted so a later
    // unthrottled window can re-fire; the winners keep theirs.
    let fired_a0 = keys::first_fire(77, "a0", ActionSignal::Abnormal);
    let fired_a4 = keys::first_fire(77, "a4", ActionSignal::Abnormal);
    assert!(h.store.get(&fired_a0).await.unwrap().is_some());
    assert!(h.store.get(&fired_a4).await.unwrap().is_none());
}

#[tokio::test]
async fn lock_contention_schedules_strategy_scoped_retry() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![monitor_config(1, "A", 11, &["ip"])],
        vec![detect(3, "A", None)],
    );
    let h = harness(vec![strategy.clone()]);

    let alert = make_alert("a1", 11, &[("ip", "10.0.0.1")]);
    let hash = dimension_hash_for(&strategy, &alert);

    // Another worker holds the (strategy, dimension) lock
    let _held = h
        .store
        .acquire_lock(&keys::composite_lock(100, &hash), 9999, 0)
        .await
        .unwrap();

    h.feed(alert).await;
    assert!(h.published().is_empty());

    let retries = h.retries();
    assert_eq!(retries.len(), 1);
    let (payload, countdown) = &retries[0];
    assert_eq!(countdown, &1);
    assert_eq!(payload.retry_times, 2);
    assert_eq!(payload.composite_strategy_ids, Some(vec![100]));
    assert_eq!(payload.alert_key, "a1");
}

#[tokio::test]
async fn work_item_with_stale_status_uses_latest_document() {
    let h = harness_with(MockStrategyCache::new(Vec::new()), test_config());

    let alert = make_alert("a1", 77, &[]);
    h.feed(alert.clone()).await;
    assert_eq!(h.actions()[0].signal, ActionSignal::Abnormal);

    // The queue delivered an ABNORMAL work item, but the document has
    // already recovered; the latest status wins.
    let mut recovered = alert;
    recovered.status = AlertStatus::Recovered;
    recovered.update_time = NOW + 30;
    h.alerts.put(recovered);
    let input = ProcessInput {
        alert_key: "a1".to_string(),
        alert_status: Some(AlertStatus::Abnormal),
        composite_strategy_ids: None,
        retry_times: 0,
    };
    h.processor.process(input).await.unwrap();

    let actions = h.actions();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[1].signal, ActionSignal::Recovered);
}

#[tokio::test]
async fn retry_cap_drops_exhausted_work_items() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![monitor_config(1, "A", 11, &["ip"])],
        vec![detect(3, "A", None)],
    );
    let h = harness(vec![strategy.clone()]);

    let alert = make_alert("a1", 11, &[("ip", "10.0.0.1")]);
    let hash = dimension_hash_for(&strategy, &alert);
    let _held = h
        .store
        .acquire_lock(&keys::composite_lock(100, &hash), 9999, 0)
        .await
        .unwrap();

    h.alerts.put(alert);
    let input = ProcessInput {
        alert_key: "a1".to_string(),
        alert_status: None,
        composite_strategy_ids: Some(vec![100]),
        retry_times: 10,
    };
    h.processor.process(input).await.unwrap();

    // retry_times would grow past the cap: the pairing is dropped instead
    // of re-queued.
    assert!(h.retries().is_empty());
}

#[tokio::test]
async fn no_data_alert_bypasses_composite_and_never_recovers() {
    let strategy = three_stream_strategy(3);
    let h = harness(vec![strategy]);

    let mut alert = make_alert("n1", 11, &[("ip", "10.0.0.1")]);
    alert.is_no_data = true;
    h.feed(alert.clone()).await;

    assert!(h.published().is_empty());
    let actions = h.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].signal, ActionSignal::NoData);

    // A later non-abnormal update produces no recovery signal and drops
    // the cached severity.
    alert.status = AlertStatus::Recovered;
    alert.update_time = NOW + 30;
    h.feed(alert).await;
    assert_eq!(h.actions().len(), 1);
    assert!(h
        .store
        .get(&keys::action_detect("n1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn strategy_outside_alarm_time_is_skipped() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![monitor_config(1, "A", 11, &["ip"])],
        vec![detect(3, "A", None)],
    );
    let mut cache = MockStrategyCache::new(vec![strategy]);
    cache.alarm_ok = false;
    let h = harness_with(cache, test_config());

    h.feed(make_alert("a1", 11, &[("ip", "10.0.0.1")])).await;
    assert!(h.published().is_empty());
}

#[tokio::test]
async fn publish_failure_surfaces_to_caller() {
    let strategy = composite_strategy(
        100,
        "关联策略",
        vec![monitor_config(1, "A", 11, &["ip"])],
        vec![detect(3, "A", None)],
    );
    let h = harness(vec![strategy]);
    h.publisher.fail.store(true, Ordering::SeqCst);

    let alert = make_alert("a1", 11, &[("ip", "10.0.0.1")]);
    h.alerts.put(alert.clone());
    let result = h.processor.process(ProcessInput::new("a1")).await;
    assert!(matches!(
        result,
        Err(crate::error::CorrelateError::Publish(_))
    ));
}

#[tokio::test]
async fn third_party_alert_participates_by_name() {
    let strategy = composite_strategy(
        100,
        "自愈关联",
        vec![fta_config(1, "A", "ping 失败", &["ip"])],
        vec![detect(1, "A", None)],
    );
    let h = harness(vec![strategy]);

    let mut alert = make_alert("t1", 0, &[("ip", "10.0.0.3")]);
    alert.strategy_id = None;
    alert.name = "ping 失败".to_string();
    h.feed(alert).await;

    let events = h.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, 1);

    // Third-party alerts have no primary strategy: no action gating.
    assert!(h.actions().is_empty());
}

#[tokio::test]
async fn first_fire_marker_blocks_duplicate_actions() {
    let h = harness_with(MockStrategyCache::new(Vec::new()), test_config());

    let alert = make_alert("a1", 77, &[]);
    h.feed(alert.clone()).await;
    assert_eq!(h.actions().len(), 1);

    // Reprocessing: cached severity is present, no new signal at all.
    h.feed(alert.clone()).await;
    assert_eq!(h.actions().len(), 1);

    // Even with the cached severity gone, the first-fire marker still
    // guards the enqueue.
    h.store.del(&keys::action_detect("a1")).await.unwrap();
    h.feed(alert).await;
    assert_eq!(h.actions().len(), 1);
}
