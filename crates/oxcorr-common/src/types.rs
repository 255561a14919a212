use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Alert severity level. Level 1 is the most severe.
///
/// Stored on the wire as the integer level, so ordering comparisons go
/// through [`Severity::level`] rather than the enum discriminant order.
///
/// # Examples
///
/// ```
/// use oxcorr_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.level(), 2);
/// assert!(Severity::Fatal.is_more_severe_than(Severity::Remind));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Severity {
    Fatal,
    Warning,
    Remind,
}

impl Severity {
    /// The wire-level integer, 1 (fatal) through 3 (remind).
    pub fn level(self) -> u8 {
        match self {
            Severity::Fatal => 1,
            Severity::Warning => 2,
            Severity::Remind => 3,
        }
    }

    /// Lower level means more severe.
    pub fn is_more_severe_than(self, other: Severity) -> bool {
        self.level() < other.level()
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(Severity::Fatal),
            2 => Ok(Severity::Warning),
            3 => Ok(Severity::Remind),
            other => Err(format!("unknown severity level: {other}")),
        }
    }
}

impl From<Severity> for u8 {
    fn from(sev: Severity) -> u8 {
        sev.level()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Fatal => write!(f, "fatal"),
            Severity::Warning => write!(f, "warning"),
            Severity::Remind => write!(f, "remind"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fatal" | "1" => Ok(Severity::Fatal),
            "warning" | "2" => Ok(Severity::Warning),
            "remind" | "3" => Ok(Severity::Remind),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Lifecycle status of an alert document. Status progresses
/// `Abnormal -> (Recovered | Closed)` and never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Abnormal,
    Recovered,
    Closed,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Abnormal => write!(f, "ABNORMAL"),
            AlertStatus::Recovered => write!(f, "RECOVERED"),
            AlertStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Truth value of one query config inside an evaluation cycle.
///
/// `NoData` marks an alias with no corresponding query-config result; for
/// boolean combination it behaves like `Normal` so an absent alias never
/// forces a level true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Truth {
    Abnormal,
    Normal,
    NoData,
}

impl Truth {
    pub fn as_bool(self) -> bool {
        matches!(self, Truth::Abnormal)
    }
}

/// Combines the results of multiple detects sharing one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl std::fmt::Display for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connector::And => write!(f, "and"),
            Connector::Or => write!(f, "or"),
        }
    }
}

impl std::str::FromStr for Connector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "and" | "" => Ok(Connector::And),
            "or" => Ok(Connector::Or),
            _ => Err(format!("unknown connector: {s}")),
        }
    }
}

/// The representative raw event carried by an alert.
///
/// Condition keys prefixed `tags.` address [`EventRecord::tags`]; bare keys
/// address [`EventRecord::fields`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub time: i64,
    /// Top-level event fields (target, ip, metric, ...).
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Flattened tag values from the original event payload.
    #[serde(default)]
    pub tags: BTreeMap<String, Value>,
}

/// A deduplicated anomaly maintained by the upstream detector.
///
/// The correlation core only ever reads alerts; it never creates or
/// mutates them. `id` is stable across updates and `update_time` is
/// non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// 告警去重指纹（同源告警共享同一指纹）
    pub dedupe_md5: String,
    pub name: String,
    /// None 表示第三方（自愈接入）告警
    pub strategy_id: Option<i64>,
    pub severity: Severity,
    pub status: AlertStatus,
    pub biz_id: i64,
    pub create_time: i64,
    pub update_time: i64,
    /// Flattened dimensions, used for public-dimension projection.
    #[serde(default)]
    pub dimensions: BTreeMap<String, Value>,
    #[serde(default)]
    pub is_no_data: bool,
    #[serde(default)]
    pub is_acknowledged: bool,
    #[serde(default)]
    pub is_handled: bool,
    pub top_event: EventRecord,
}

/// One predicate of a query config's `agg_condition`.
///
/// `method` carries the wire operator name and is parsed by the matcher;
/// `value` is always a list with membership semantics inside the
/// predicate. `condition` joins this predicate to the previous one and is
/// ignored on the first predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionPredicate {
    pub key: String,
    pub method: String,
    #[serde(default)]
    pub value: Vec<Value>,
    #[serde(default)]
    pub condition: Option<Connector>,
}

/// One input channel of a strategy item: identifies a stream of alerts to
/// watch and the conditions they must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub id: i64,
    /// 表达式中引用本通道的别名（如 "A"）
    pub alias: String,
    pub metric_id: String,
    pub data_source_label: String,
    pub data_type_label: String,
    /// 聚合维度（用于公共维度求交）
    #[serde(default)]
    pub agg_dimension: Vec<String>,
    /// 监控策略告警来源（data_source = bk_monitor 时使用）
    #[serde(default, rename = "bkmonitor_strategy_id")]
    pub strategy_id: Option<i64>,
    /// 第三方告警名称来源（data_source = bk_fta 时使用）
    #[serde(default)]
    pub alert_name: Option<String>,
    #[serde(default)]
    pub agg_condition: Vec<ConditionPredicate>,
}

/// One `(level, expression, connector)` triple of a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detect {
    pub level: u8,
    pub expression: String,
    #[serde(default)]
    pub connector: Option<Connector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub query_configs: Vec<QueryConfig>,
}

/// A composite strategy resolved from the configuration cache. Treated as
/// immutable within one processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub biz_id: i64,
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub detects: Vec<Detect>,
}

impl Strategy {
    /// All query configs across items, in configuration order.
    pub fn query_configs(&self) -> impl Iterator<Item = &QueryConfig> {
        self.items.iter().flat_map(|item| item.query_configs.iter())
    }
}

/// One rendered dimension of a derived event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDimension {
    pub key: String,
    pub value: Value,
    pub display_key: String,
    pub display_value: String,
}

/// The event published when a composite strategy's state transitions.
///
/// `event_id` is `dimension_hash + "." + publish_time`, so re-publishes
/// after a crash produce fresh ids and downstream deduplicates on
/// `(strategy_id, dimension_hash, status, severity)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedEvent {
    pub event_id: String,
    pub strategy_id: i64,
    pub alert_name: String,
    /// The level that fired or recovered.
    pub severity: u8,
    pub status: AlertStatus,
    pub dimensions: Vec<EventDimension>,
    pub target_type: String,
    pub target: String,
    pub time: i64,
    pub description: String,
}

/// The kind of action a gated alert pushes downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionSignal {
    Abnormal,
    Recovered,
    Closed,
    NoData,
    Ack,
}

impl std::fmt::Display for ActionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionSignal::Abnormal => write!(f, "ABNORMAL"),
            ActionSignal::Recovered => write!(f, "RECOVERED"),
            ActionSignal::Closed => write!(f, "CLOSED"),
            ActionSignal::NoData => write!(f, "NO_DATA"),
            ActionSignal::Ack => write!(f, "ACK"),
        }
    }
}

/// An action handed to the external dispatcher after first-fire and QoS
/// gating. Summary instances stand in for a throttled window of per-alert
/// actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInstance {
    pub strategy_id: i64,
    pub alert_id: String,
    pub signal: ActionSignal,
    pub severity: Severity,
    pub dedupe_md5: String,
    #[serde(default)]
    pub is_summary: bool,
    /// QoS 窗口标识（仅汇总动作携带）
    #[serde(default)]
    pub qos_window_key: Option<String>,
}

/// Format a dimension map into a human-readable string.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use oxcorr_common::types::format_dimensions;
///
/// let mut dims = BTreeMap::new();
/// dims.insert("ip".to_string(), serde_json::json!("10.0.0.1"));
/// dims.insert("bk_cloud_id".to_string(), serde_json::json!(0));
/// let s = format_dimensions(&dims);
/// assert!(s.contains("ip=10.0.0.1"));
/// assert!(s.contains("bk_cloud_id=0"));
/// ```
pub fn format_dimensions(dims: &BTreeMap<String, Value>) -> String {
    dims.iter()
        .map(|(k, v)| format!("{k}={}", display_value(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a JSON value the way it appears in dimension displays: strings
/// without quotes, everything else in its JSON form.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
