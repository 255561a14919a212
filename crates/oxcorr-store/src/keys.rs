//! Key layout for correlation state in the coordination store.
//!
//! Every key is namespaced under `correlate.` so pattern deletion never
//! touches another subsystem's data.

use oxcorr_common::types::ActionSignal;

/// Sliding-window abnormal set for one query config of one strategy
/// dimension.
pub fn check_set(strategy_id: i64, dimension_hash: &str, config_hash: &str) -> String {
    format!("correlate.check.{strategy_id}.{dimension_hash}.{config_hash}")
}

/// Glob matching every check set of a `(strategy, dimension)` pair.
pub fn check_set_pattern(strategy_id: i64, dimension_hash: &str) -> String {
    format!("correlate.check.{strategy_id}.{dimension_hash}.*")
}

/// Serialized `level -> bool` map from the previous evaluation.
pub fn detect_result(strategy_id: i64, dimension_hash: &str) -> String {
    format!("correlate.detect.{strategy_id}.{dimension_hash}")
}

/// Cached severity of the last Abnormal action gating for one alert.
pub fn action_detect(alert_id: &str) -> String {
    format!("correlate.action.detect.{alert_id}")
}

/// First-fire marker guaranteeing one action per (strategy, alert, signal).
pub fn first_fire(strategy_id: i64, alert_id: &str, signal: ActionSignal) -> String {
    format!("correlate.action.fired.{strategy_id}.{alert_id}.{signal}")
}

/// Short-window QoS counter per (strategy, signal, severity, fingerprint).
pub fn qos_counter(strategy_id: i64, signal: ActionSignal, severity: u8, dedupe_md5: &str) -> String {
    format!("correlate.action.qos.{strategy_id}.{signal}.{severity}.{dedupe_md5}")
}

/// Marker limiting the throttled-window summary action to one per window.
pub fn qos_summary(strategy_id: i64, signal: ActionSignal, severity: u8, dedupe_md5: &str) -> String {
    format!("{}.summary", qos_counter(strategy_id, signal, severity, dedupe_md5))
}

/// Exclusive lock serializing evaluation of a `(strategy, dimension)` pair.
pub fn composite_lock(strategy_id: i64, dimension_hash: &str) -> String {
    format!("correlate.lock.composite.{strategy_id}.{dimension_hash}")
}

/// Exclusive lock serializing action gating of one alert.
pub fn action_lock(alert_id: &str) -> String {
    format!("correlate.lock.action.{alert_id}")
}
