//! Per-level boolean evaluation and edge detection.
//!
//! Each strategy level aggregates its detects through a connector, the
//! resulting `level -> bool` map is compared against the previously
//! persisted map, and the first differing level (ascending, recovery
//! before fire) decides the transition.

use crate::expr;
use oxcorr_common::types::{Connector, Strategy, Truth};
use std::collections::{BTreeMap, HashMap};

/// The decision of one evaluation cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectOutcome {
    /// The level that fired or recovered, if any.
    pub abnormal_level: Option<u8>,
    /// True when the transition is a recovery.
    pub is_closed: bool,
    /// The new `level -> bool` map, persisted as the next prior.
    pub current: BTreeMap<u8, bool>,
}

/// Evaluates every detect of the strategy against the alias truth
/// context and folds same-level detects through their connector.
///
/// The connector is taken from the last detect of the level and defaults
/// to `and`. Under `and`, every detect must evaluate (a detect whose
/// expression fails to compile contributes nothing, which keeps the level
/// false); under `or`, any true detect suffices.
pub fn evaluate_levels(strategy: &Strategy, ctx: &HashMap<String, Truth>) -> BTreeMap<u8, bool> {
    let mut by_level: BTreeMap<u8, Vec<&oxcorr_common::types::Detect>> = BTreeMap::new();
    for detect in &strategy.detects {
        by_level.entry(detect.level).or_default().push(detect);
    }

    let mut current = BTreeMap::new();
    for (level, detects) in by_level {
        let mut results = Vec::with_capacity(detects.len());
        for detect in &detects {
            match expr::parse(&detect.expression) {
                Ok(ast) => results.push(ast.eval(ctx)),
                Err(e) => {
                    tracing::warn!(
                        strategy_id = strategy.id,
                        level,
                        expression = %detect.expression,
                        error = %e,
                        "Expression failed to compile, detect contributes no result"
                    );
                }
            }
        }
        let connector = detects
            .last()
            .and_then(|d| d.connector)
            .unwrap_or_default();
        let value = match connector {
            Connector::Or => results.iter().any(|&b| b),
            Connector::And => {
                results.len() == detects.len() && results.iter().all(|&b| b)
            }
        };
        current.insert(level, value);
    }
    current
}

/// Compares current against prior truth, ascending by level.
///
/// A recovery at any level wins over a fire at any level; within each
/// pass the first differing level (most severe first) breaks.
pub fn detect_transition(
    current: &BTreeMap<u8, bool>,
    prior: &BTreeMap<u8, bool>,
) -> (Option<u8>, bool) {
    let levels: std::collections::BTreeSet<u8> =
        current.keys().chain(prior.keys()).copied().collect();

    for &level in &levels {
        let now = current.get(&level).copied().unwrap_or(false);
        let was = prior.get(&level).copied().unwrap_or(false);
        if !now && was {
            return (Some(level), true);
        }
    }
    for &level in &levels {
        let now = current.get(&level).copied().unwrap_or(false);
        let was = prior.get(&level).copied().unwrap_or(false);
        if now && !was {
            return (Some(level), false);
        }
    }
    (None, false)
}

/// Human text for the derived event.
///
/// Abnormal events carry the triggering level's expressions with aliases
/// substituted by metric names; recoveries carry a fixed sentence.
pub fn build_description(strategy: &Strategy, level: u8, is_closed: bool) -> String {
    if is_closed {
        return "告警关联关系不再满足，告警已关闭".to_string();
    }

    let names: HashMap<String, String> = strategy
        .query_configs()
        .map(|c| (c.alias.clone(), c.metric_id.clone()))
        .collect();

    let detects: Vec<&oxcorr_common::types::Detect> = strategy
        .detects
        .iter()
        .filter(|d| d.level == level)
        .collect();
    let connector = detects
        .last()
        .and_then(|d| d.connector)
        .unwrap_or_default();

    let rendered: Vec<String> = detects
        .iter()
        .filter_map(|d| expr::parse(&d.expression).ok().map(|ast| ast.render(&names)))
        .collect();
    format!("满足告警关联条件：{}", rendered.join(&format!(" {connector} ")))
}
