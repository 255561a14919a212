//! Query-config classification and dimension projection.
//!
//! For each strategy the incoming alert partitions the query configs into
//! *matched* (the alert satisfies both the datasource identity and the
//! config's `agg_condition`) and *unmatched* (truth comes from the
//! persisted window instead).

use crate::condition;
use oxcorr_common::hash::content_hash;
use oxcorr_common::types::{Alert, QueryConfig, Strategy};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DATA_SOURCE_FTA: &str = "bk_fta";
pub const DATA_SOURCE_MONITOR: &str = "bk_monitor";
pub const DATA_TYPE_ALERT: &str = "alert";

/// The two partitions, keyed by a stable content hash of the config so
/// each distinct config appears exactly once.
#[derive(Debug, Default)]
pub struct ClassifiedConfigs {
    pub matched: BTreeMap<String, QueryConfig>,
    pub unmatched: BTreeMap<String, QueryConfig>,
}

/// Stable identity of a query config within the correlation state store.
pub fn config_hash(config: &QueryConfig) -> String {
    let value = serde_json::to_value(config).unwrap_or(Value::Null);
    content_hash(&value)
}

/// Whether the config watches the stream this alert belongs to.
///
/// Third-party (fta) configs match on the alert name; monitor configs
/// match on the upstream strategy id.
pub fn matches_datasource(config: &QueryConfig, alert: &Alert) -> bool {
    if config.data_type_label != DATA_TYPE_ALERT {
        return false;
    }
    match config.data_source_label.as_str() {
        DATA_SOURCE_FTA => config.alert_name.as_deref() == Some(alert.name.as_str()),
        DATA_SOURCE_MONITOR => {
            config.strategy_id.is_some() && config.strategy_id == alert.strategy_id
        }
        _ => false,
    }
}

/// Partitions a strategy's query configs against an alert.
///
/// A config that fails the datasource identity is unmatched regardless of
/// its condition; an empty `agg_condition` is trivially true.
pub fn classify(strategy: &Strategy, alert: &Alert) -> ClassifiedConfigs {
    let mut out = ClassifiedConfigs::default();
    for config in strategy.query_configs() {
        let hash = config_hash(config);
        let matched = matches_datasource(config, alert)
            && condition::evaluate_conditions(&config.agg_condition, alert);
        if matched {
            out.matched.insert(hash, config.clone());
        } else {
            out.unmatched.insert(hash, config.clone());
        }
    }
    out
}

/// The set intersection of `agg_dimension` across all query configs,
/// sorted for stability.
pub fn public_dimensions(strategy: &Strategy) -> Vec<String> {
    let mut configs = strategy.query_configs();
    let Some(first) = configs.next() else {
        return Vec::new();
    };
    let mut keys: Vec<String> = first.agg_dimension.clone();
    for config in configs {
        keys.retain(|k| config.agg_dimension.contains(k));
    }
    keys.sort();
    keys.dedup();
    keys
}

/// Projects the alert's flattened dimensions onto the public-dimension
/// keys. Missing keys project to `null` so arity stays fixed and two
/// alerts hash equal iff their values on the public dimensions are equal.
pub fn project_dimensions(alert: &Alert, keys: &[String]) -> BTreeMap<String, Value> {
    keys.iter()
        .map(|k| {
            (
                k.clone(),
                alert.dimensions.get(k).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

/// Stable hash of a projected dimension map; the unit of correlation
/// state.
pub fn dimension_hash(projection: &BTreeMap<String, Value>) -> String {
    let value = serde_json::to_value(projection).unwrap_or(Value::Null);
    content_hash(&value)
}
