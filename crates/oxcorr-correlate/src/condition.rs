//! Predicate operators and condition evaluation for query configs.
//!
//! `agg_condition` is a sequence of `{key, method, value, condition}`
//! predicates combined strictly left-to-right: `or` is NOT given lower
//! precedence than `and`, matching upstream semantics. Keys prefixed
//! `tags.` address flattened event tags; bare keys address top-level
//! event fields.

use glob_match::glob_match;
use oxcorr_common::types::{display_value, Alert, ConditionPredicate, Connector};
use serde_json::Value;
use std::str::FromStr;

/// Tagged-variant predicate operator shared by the condition evaluator.
///
/// `value` lists have membership semantics within one predicate: positive
/// operators succeed when any observed/target pair satisfies them,
/// negative operators when no pair satisfies the positive counterpart,
/// and `All*` operators when every observed value satisfies the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Is,
    IsNot,
    Exists,
    DoesNotExist,
    OneOf,
    NotOneOf,
    Gt,
    Gte,
    Lt,
    Lte,
    WildcardEq,
    WildcardNe,
    Contains,
    NotContains,
    Regex,
    NotRegex,
    Prefix,
    AllContains,
    AllEqWildcard,
    AllNeWildcard,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" | "is" => Ok(Self::Is),
            "neq" | "ne" | "is not" => Ok(Self::IsNot),
            "exists" => Ok(Self::Exists),
            "nexists" | "does not exists" => Ok(Self::DoesNotExist),
            "one of" => Ok(Self::OneOf),
            "not one of" => Ok(Self::NotOneOf),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "wildcard" => Ok(Self::WildcardEq),
            "nwildcard" => Ok(Self::WildcardNe),
            "include" | "contains" => Ok(Self::Contains),
            "exclude" | "not contains" => Ok(Self::NotContains),
            "reg" | "regex" => Ok(Self::Regex),
            "nreg" => Ok(Self::NotRegex),
            "prefix" | "begins with" => Ok(Self::Prefix),
            "all include" | "all contains" => Ok(Self::AllContains),
            "all wildcard" => Ok(Self::AllEqWildcard),
            "all nwildcard" => Ok(Self::AllNeWildcard),
            _ => Err(format!("unknown condition operator: {s}")),
        }
    }
}

impl Operator {
    /// Applies the operator to the observed field values against the
    /// predicate's target list.
    pub fn apply(self, observed: &[String], targets: &[String]) -> bool {
        match self {
            Self::Is | Self::OneOf => any_pair(observed, targets, |o, t| o == t),
            Self::IsNot | Self::NotOneOf => !any_pair(observed, targets, |o, t| o == t),
            Self::Exists => !observed.is_empty(),
            Self::DoesNotExist => observed.is_empty(),
            Self::Gt => any_numeric_pair(observed, targets, |o, t| o > t),
            Self::Gte => any_numeric_pair(observed, targets, |o, t| o >= t),
            Self::Lt => any_numeric_pair(observed, targets, |o, t| o < t),
            Self::Lte => any_numeric_pair(observed, targets, |o, t| o <= t),
            Self::WildcardEq => any_pair(observed, targets, |o, t| glob_match(t, o)),
            Self::WildcardNe => !any_pair(observed, targets, |o, t| glob_match(t, o)),
            Self::Contains => any_pair(observed, targets, |o, t| o.contains(t)),
            Self::NotContains => !any_pair(observed, targets, |o, t| o.contains(t)),
            Self::Regex => regex_any(observed, targets),
            Self::NotRegex => {
                // An uncompilable pattern fails the predicate rather than
                // silently matching everything through the negation.
                compile_all(targets).is_some_and(|res| {
                    !res.iter().any(|re| observed.iter().any(|o| re.is_match(o)))
                })
            }
            Self::Prefix => any_pair(observed, targets, |o, t| o.starts_with(t)),
            Self::AllContains => all_pair(observed, targets, |o, t| o.contains(t)),
            Self::AllEqWildcard => all_pair(observed, targets, |o, t| glob_match(t, o)),
            Self::AllNeWildcard => observed
                .iter()
                .all(|o| !targets.iter().any(|t| glob_match(t, o))),
        }
    }
}

fn any_pair(observed: &[String], targets: &[String], check: impl Fn(&str, &str) -> bool) -> bool {
    observed
        .iter()
        .any(|o| targets.iter().any(|t| check(o, t)))
}

/// `all`-variant operators require every observed value to satisfy the
/// predicate; an absent field satisfies nothing.
fn all_pair(observed: &[String], targets: &[String], check: impl Fn(&str, &str) -> bool) -> bool {
    !observed.is_empty()
        && observed
            .iter()
            .all(|o| targets.iter().any(|t| check(o, t)))
}

fn any_numeric_pair(observed: &[String], targets: &[String], check: impl Fn(f64, f64) -> bool) -> bool {
    observed.iter().any(|o| {
        let Ok(o) = o.parse::<f64>() else { return false };
        targets
            .iter()
            .any(|t| t.parse::<f64>().map_or(false, |t| check(o, t)))
    })
}

fn compile_all(patterns: &[String]) -> Option<Vec<regex::Regex>> {
    patterns
        .iter()
        .map(|p| {
            regex::Regex::new(p)
                .map_err(|e| {
                    tracing::warn!(pattern = %p, error = %e, "Skipping invalid regex in condition");
                })
                .ok()
        })
        .collect()
}

fn regex_any(observed: &[String], targets: &[String]) -> bool {
    compile_all(targets).is_some_and(|res| {
        res.iter().any(|re| observed.iter().any(|o| re.is_match(o)))
    })
}

/// Resolves a condition key against the alert's representative event.
pub fn resolve_field(alert: &Alert, key: &str) -> Vec<String> {
    let value = match key.strip_prefix("tags.") {
        Some(tag_key) => alert.top_event.tags.get(tag_key),
        None => alert.top_event.fields.get(key),
    };
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(display_value).collect(),
        Some(other) => vec![display_value(other)],
    }
}

fn eval_predicate(predicate: &ConditionPredicate, alert: &Alert) -> bool {
    let op = match Operator::from_str(&predicate.method) {
        Ok(op) => op,
        Err(e) => {
            tracing::warn!(key = %predicate.key, error = %e, "Skipping predicate");
            return false;
        }
    };
    let observed = resolve_field(alert, &predicate.key);
    let targets: Vec<String> = predicate.value.iter().map(display_value).collect();
    op.apply(&observed, &targets)
}

/// Evaluates an `agg_condition` sequence against an alert.
///
/// The first predicate's connector is ignored; an empty sequence is
/// trivially true.
pub fn evaluate_conditions(predicates: &[ConditionPredicate], alert: &Alert) -> bool {
    let mut result: Option<bool> = None;
    for predicate in predicates {
        let value = eval_predicate(predicate, alert);
        result = Some(match result {
            None => value,
            Some(acc) => match predicate.condition.unwrap_or_default() {
                Connector::And => acc && value,
                Connector::Or => acc || value,
            },
        });
    }
    result.unwrap_or(true)
}
