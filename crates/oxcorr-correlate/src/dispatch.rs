//! Dispatch gate: composite emit and single-strategy action gating.
//!
//! Both sub-paths run under exclusive locks and share the QoS rules. The
//! composite path publishes the derived event before persisting the new
//! prior map; a crash in between re-fires at most once on the next
//! update, and downstream deduplicates.

use crate::config::ProcessorConfig;
use crate::error::{CorrelateError, Result};
use crate::evaluator::{self, DetectOutcome};
use crate::matcher::ClassifiedConfigs;
use crate::{ActionDispatcher, EventPublisher};
use oxcorr_common::types::{
    display_value, ActionInstance, ActionSignal, Alert, AlertStatus, DerivedEvent, EventDimension,
    Strategy, Truth,
};
use oxcorr_store::check::CompositeStateStore;
use oxcorr_store::{keys, CoordinationStore};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub struct DispatchGate {
    store: Arc<dyn CoordinationStore>,
    state: Arc<CompositeStateStore>,
    publisher: Arc<dyn EventPublisher>,
    actions: Arc<dyn ActionDispatcher>,
    config: Arc<ProcessorConfig>,
}

impl DispatchGate {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        state: Arc<CompositeStateStore>,
        publisher: Arc<dyn EventPublisher>,
        actions: Arc<dyn ActionDispatcher>,
        config: Arc<ProcessorConfig>,
    ) -> Self {
        Self {
            store,
            state,
            publisher,
            actions,
            config,
        }
    }

    /// Runs one composite evaluation cycle for a strategy under the
    /// `(strategy, dimension)` lock. Returns the published event, if the
    /// cycle produced a transition.
    pub async fn process_composite(
        &self,
        strategy: &Strategy,
        alert: &Alert,
        dimension_hash: &str,
        projection: &BTreeMap<String, Value>,
        classified: &ClassifiedConfigs,
        now: i64,
    ) -> Result<Option<DerivedEvent>> {
        let lock_key = keys::composite_lock(strategy.id, dimension_hash);
        let token = self
            .store
            .acquire_lock(&lock_key, self.config.lock_ttl_secs, self.config.lock_wait_secs)
            .await?;

        let result = self
            .composite_locked(strategy, alert, dimension_hash, projection, classified, now)
            .await;

        if let Err(e) = self.store.release_lock(&lock_key, &token).await {
            tracing::warn!(key = %lock_key, error = %e, "Failed to release composite lock");
        }
        result
    }

    async fn composite_locked(
        &self,
        strategy: &Strategy,
        alert: &Alert,
        dimension_hash: &str,
        projection: &BTreeMap<String, Value>,
        classified: &ClassifiedConfigs,
        now: i64,
    ) -> Result<Option<DerivedEvent>> {
        let mut ctx: HashMap<String, Truth> = HashMap::new();
        for (config_hash, config) in &classified.matched {
            let truth = self
                .state
                .update_matched(strategy.id, dimension_hash, config_hash, alert, now)
                .await?;
            ctx.insert(config.alias.clone(), truth);
        }
        for (config_hash, config) in &classified.unmatched {
            let truth = self
                .state
                .query_unmatched(strategy.id, dimension_hash, config_hash, now)
                .await?;
            ctx.insert(config.alias.clone(), truth);
        }

        let prior = self.state.read_prior_detect(strategy.id, dimension_hash).await?;
        let current = evaluator::evaluate_levels(strategy, &ctx);
        let (abnormal_level, is_closed) = evaluator::detect_transition(&current, &prior);
        let outcome = DetectOutcome {
            abnormal_level,
            is_closed,
            current,
        };

        let Some(level) = outcome.abnormal_level else {
            self.state
                .write_prior_detect(strategy.id, dimension_hash, &outcome.current)
                .await?;
            return Ok(None);
        };

        let event = build_derived_event(strategy, alert, dimension_hash, projection, level, outcome.is_closed, now);

        // Publish before persisting: a crash in between re-fires once on
        // the next update and downstream deduplicates by event identity.
        self.publisher
            .publish(vec![event.clone()])
            .await
            .map_err(|e| CorrelateError::Publish(e.to_string()))?;
        self.state
            .write_prior_detect(strategy.id, dimension_hash, &outcome.current)
            .await?;
        Ok(Some(event))
    }

    /// Gates action dispatch for the alert itself under the alert lock.
    ///
    /// `composite_dims` lists the `(strategy, dimension)` pairs whose
    /// composite state this alert feeds; they are cleared when the alert
    /// leaves the abnormal state.
    pub async fn gate_action(
        &self,
        alert: &Alert,
        composite_dims: &[(i64, String)],
        now: i64,
    ) -> Result<()> {
        let Some(strategy_id) = alert.strategy_id else {
            return Ok(());
        };

        let lock_key = keys::action_lock(&alert.id);
        let token = self
            .store
            .acquire_lock(&lock_key, self.config.lock_ttl_secs, self.config.lock_wait_secs)
            .await?;

        let result = self
            .gate_locked(strategy_id, alert, composite_dims, now)
            .await;

        if let Err(e) = self.store.release_lock(&lock_key, &token).await {
            tracing::warn!(key = %lock_key, error = %e, "Failed to release action lock");
        }
        result
    }

    async fn gate_locked(
        &self,
        strategy_id: i64,
        alert: &Alert,
        composite_dims: &[(i64, String)],
        now: i64,
    ) -> Result<()> {
        let detect_key = keys::action_detect(&alert.id);
        let cached_level = self
            .store
            .get(&detect_key)
            .await?
            .and_then(|v| v.parse::<u8>().ok());

        if let Some(signal) = decide_signal(cached_level, alert, now, self.config.qos_drop_window_secs)
        {
            self.fire(strategy_id, alert, signal, now).await?;
        }

        if alert.status == AlertStatus::Abnormal {
            self.store
                .set(
                    &detect_key,
                    &alert.severity.level().to_string(),
                    Some(self.config.action_cache_ttl_secs),
                )
                .await?;
        } else {
            self.store.del(&detect_key).await?;
            // A closed primary alert must not keep composite state live.
            for (sid, dimension_hash) in composite_dims {
                self.state.clear(*sid, dimension_hash).await?;
            }
        }
        Ok(())
    }

    /// First-fire and QoS guards in front of the action dispatcher.
    async fn fire(
        &self,
        strategy_id: i64,
        alert: &Alert,
        signal: ActionSignal,
        now: i64,
    ) -> Result<()> {
        let severity = alert.severity.level();
        let fire_key = keys::first_fire(strategy_id, &alert.id, signal);
        let won = self
            .store
            .set_nx(&fire_key, &now.to_string(), self.config.first_fire_ttl_secs)
            .await?;
        if !won {
            tracing::debug!(
                strategy_id,
                alert_id = %alert.id,
                signal = %signal,
                "First-fire already claimed, skipping"
            );
            return Ok(());
        }

        let qos_key = keys::qos_counter(strategy_id, signal, severity, &alert.dedupe_md5);
        let count = self.store.incr(&qos_key, self.config.qos_window_secs).await?;
        if count > self.config.qos_threshold {
            // Deleting the marker lets a later unthrottled window re-fire.
            self.store.del(&fire_key).await?;
            let summary_key = keys::qos_summary(strategy_id, signal, severity, &alert.dedupe_md5);
            if self
                .store
                .set_nx(&summary_key, "1", self.config.qos_window_secs)
                .await?
            {
                self.dispatch_action(ActionInstance {
                    strategy_id,
                    alert_id: alert.id.clone(),
                    signal,
                    severity: alert.severity,
                    dedupe_md5: alert.dedupe_md5.clone(),
                    is_summary: true,
                    qos_window_key: Some(qos_key.clone()),
                })
                .await?;
            }
            tracing::info!(
                strategy_id,
                alert_id = %alert.id,
                signal = %signal,
                count,
                "Action throttled by QoS"
            );
            return Ok(());
        }

        self.dispatch_action(ActionInstance {
            strategy_id,
            alert_id: alert.id.clone(),
            signal,
            severity: alert.severity,
            dedupe_md5: alert.dedupe_md5.clone(),
            is_summary: false,
            qos_window_key: None,
        })
        .await
    }

    async fn dispatch_action(&self, action: ActionInstance) -> Result<()> {
        self.actions
            .dispatch(action)
            .await
            .map_err(|e| CorrelateError::Other(format!("action dispatch: {e}")))
    }
}

/// The action transition table: decides which signal (if any) a gated
/// alert pushes, given the cached severity from the previous Abnormal
/// gating.
///
/// No-data alerts fire `NoData` instead of `Abnormal` and never emit
/// recoveries. An unhandled, un-acknowledged Abnormal alert older than
/// the QoS drop window re-fires.
pub fn decide_signal(
    cached_level: Option<u8>,
    alert: &Alert,
    now: i64,
    qos_drop_window_secs: i64,
) -> Option<ActionSignal> {
    match (cached_level, alert.status) {
        (Some(_), AlertStatus::Recovered) => {
            (!alert.is_no_data).then_some(ActionSignal::Recovered)
        }
        (Some(_), AlertStatus::Closed) => (!alert.is_no_data).then_some(ActionSignal::Closed),
        (None, AlertStatus::Abnormal) => Some(if alert.is_no_data {
            ActionSignal::NoData
        } else {
            ActionSignal::Abnormal
        }),
        (Some(cached), AlertStatus::Abnormal) => {
            if alert.is_acknowledged {
                Some(ActionSignal::Ack)
            } else if alert.severity.level() < cached {
                // Escalation: strictly more severe than the cached level.
                Some(ActionSignal::Abnormal)
            } else if !alert.is_handled && now - alert.create_time >= qos_drop_window_secs {
                Some(ActionSignal::Abnormal)
            } else {
                None
            }
        }
        (None, _) => None,
    }
}

/// Builds the derived event for a transition. `event_id` embeds the
/// publish time so re-publishes after a crash get fresh ids.
pub fn build_derived_event(
    strategy: &Strategy,
    alert: &Alert,
    dimension_hash: &str,
    projection: &BTreeMap<String, Value>,
    level: u8,
    is_closed: bool,
    now: i64,
) -> DerivedEvent {
    let dimensions: Vec<EventDimension> = projection
        .iter()
        .map(|(key, value)| EventDimension {
            key: key.clone(),
            value: value.clone(),
            display_key: key.clone(),
            display_value: display_value(value),
        })
        .collect();
    let (target_type, target) = derive_target(projection);

    DerivedEvent {
        event_id: format!("{dimension_hash}.{now}"),
        strategy_id: strategy.id,
        alert_name: strategy.name.clone(),
        severity: level,
        status: if is_closed {
            AlertStatus::Closed
        } else {
            AlertStatus::Abnormal
        },
        dimensions,
        target_type,
        target,
        time: alert.update_time,
        description: evaluator::build_description(strategy, level, is_closed),
    }
}

/// Derives the event target from the projected dimensions: an `ip` makes
/// a HOST target (`ip|cloud_id`), a service instance id makes a SERVICE
/// target, anything else stays untyped.
fn derive_target(projection: &BTreeMap<String, Value>) -> (String, String) {
    let get = |key: &str| {
        projection
            .get(key)
            .filter(|v| !v.is_null())
            .map(display_value)
    };
    if let Some(ip) = get("ip") {
        let cloud_id = get("bk_cloud_id").unwrap_or_else(|| "0".to_string());
        return ("HOST".to_string(), format!("{ip}|{cloud_id}"));
    }
    if let Some(instance) = get("bk_service_instance_id") {
        return ("SERVICE".to_string(), instance);
    }
    (String::new(), String::new())
}
