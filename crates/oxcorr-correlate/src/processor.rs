//! Pipeline entry point.
//!
//! One call to [`CompositeProcessor::process`] handles one alert work
//! item: resolve candidate composite strategies, run each strategy's
//! evaluation cycle, then gate action dispatch for the alert itself.
//! Lock contention re-enters through the delay queue with the same
//! payload shape; every other per-strategy failure is contained so one
//! bad strategy cannot poison the rest of the pull.

use crate::config::ProcessorConfig;
use crate::dispatch::DispatchGate;
use crate::error::{CorrelateError, Result};
use crate::matcher;
use crate::resolver::StrategyResolver;
use crate::{ActionDispatcher, AlertSource, Clock, DelayQueue, EventPublisher, StrategyCache};
use oxcorr_common::types::{Alert, AlertStatus};
use oxcorr_store::check::CompositeStateStore;
use oxcorr_store::CoordinationStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Retry countdowns never grow past this, whatever `retry_times` says.
const MAX_RETRY_COUNTDOWN_SECS: i64 = 60;

/// One unit of work, as delivered by the task queue or re-delivered by
/// the delay queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInput {
    pub alert_key: String,
    /// Status observed at enqueue time; the latest document wins when
    /// they differ.
    #[serde(default)]
    pub alert_status: Option<AlertStatus>,
    /// Retry path only: restricts the cycle to the strategies that were
    /// lock-contended.
    #[serde(default)]
    pub composite_strategy_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub retry_times: u32,
}

impl ProcessInput {
    pub fn new(alert_key: impl Into<String>) -> Self {
        Self {
            alert_key: alert_key.into(),
            alert_status: None,
            composite_strategy_ids: None,
            retry_times: 0,
        }
    }
}

pub struct CompositeProcessor {
    alerts: Arc<dyn AlertSource>,
    cache: Arc<dyn StrategyCache>,
    resolver: StrategyResolver,
    gate: DispatchGate,
    delay_queue: Arc<dyn DelayQueue>,
    clock: Arc<dyn Clock>,
    config: Arc<ProcessorConfig>,
}

impl CompositeProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        alerts: Arc<dyn AlertSource>,
        cache: Arc<dyn StrategyCache>,
        publisher: Arc<dyn EventPublisher>,
        actions: Arc<dyn ActionDispatcher>,
        delay_queue: Arc<dyn DelayQueue>,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
    ) -> Self {
        let config = Arc::new(config);
        let state = Arc::new(CompositeStateStore::new(
            store.clone(),
            config.window_secs,
            config.check_window_ttl_margin_secs,
            config.detect_result_ttl_secs,
        ));
        let gate = DispatchGate::new(store, state, publisher, actions, config.clone());
        Self {
            alerts,
            cache: cache.clone(),
            resolver: StrategyResolver::new(cache),
            gate,
            delay_queue,
            clock,
            config,
        }
    }

    /// Processes one alert work item.
    ///
    /// # Errors
    ///
    /// Configuration-index unavailability and publish failures surface to
    /// the caller so the source work item is re-delivered; everything
    /// else is handled internally.
    pub async fn process(&self, input: ProcessInput) -> Result<()> {
        let now = self.clock.now_ts();
        let alert = self
            .alerts
            .get_by_key(&input.alert_key)
            .await
            .map_err(|e| CorrelateError::Other(format!("alert source: {e}")))?;
        let Some(alert) = alert else {
            tracing::warn!(alert_key = %input.alert_key, "Alert not found, skipping cycle");
            return Ok(());
        };
        if let Some(given) = input.alert_status {
            if given != alert.status {
                tracing::debug!(
                    alert_id = %alert.id,
                    given = %given,
                    latest = %alert.status,
                    "Work item status is stale, using latest"
                );
            }
        }

        let mut composite_dims: Vec<(i64, String)> = Vec::new();
        if alert.is_no_data {
            tracing::debug!(alert_id = %alert.id, "No-data alert bypasses composite evaluation");
        } else {
            self.process_strategies(&input, &alert, &mut composite_dims, now)
                .await?;
        }

        match self.gate.gate_action(&alert, &composite_dims, now).await {
            Ok(()) => {}
            Err(CorrelateError::LockContended { key }) => {
                tracing::warn!(alert_id = %alert.id, key = %key, "Action lock contended, scheduling retry");
                self.schedule_retry(&input, &alert, None).await;
            }
            Err(e) => {
                tracing::error!(alert_id = %alert.id, error = %e, "Action gating failed");
            }
        }
        Ok(())
    }

    /// The per-strategy firewall: lock contention goes to the retry
    /// scheduler for that strategy only, publish failures propagate, and
    /// everything else is logged and swallowed.
    async fn process_strategies(
        &self,
        input: &ProcessInput,
        alert: &Alert,
        composite_dims: &mut Vec<(i64, String)>,
        now: i64,
    ) -> Result<()> {
        let strategies = self
            .resolver
            .resolve(alert, input.composite_strategy_ids.as_deref())
            .await?;

        for strategy in &strategies {
            let (in_time, reason) = self.cache.in_alarm_time(strategy);
            if !in_time {
                tracing::info!(
                    strategy_id = strategy.id,
                    reason = %reason,
                    "Strategy outside its alarm time, skipping"
                );
                continue;
            }

            let classified = matcher::classify(strategy, alert);
            if classified.matched.is_empty() {
                continue;
            }
            let public = matcher::public_dimensions(strategy);
            let projection = matcher::project_dimensions(alert, &public);
            let dimension_hash = matcher::dimension_hash(&projection);
            composite_dims.push((strategy.id, dimension_hash.clone()));

            match self
                .gate
                .process_composite(strategy, alert, &dimension_hash, &projection, &classified, now)
                .await
            {
                Ok(Some(event)) => {
                    tracing::info!(
                        strategy_id = strategy.id,
                        event_id = %event.event_id,
                        status = %event.status,
                        severity = event.severity,
                        "Published derived alert event"
                    );
                }
                Ok(None) => {}
                Err(CorrelateError::LockContended { key }) => {
                    tracing::warn!(
                        strategy_id = strategy.id,
                        key = %key,
                        "Composite lock contended, scheduling retry"
                    );
                    self.schedule_retry(input, alert, Some(strategy.id)).await;
                }
                Err(e @ CorrelateError::Publish(_)) => {
                    tracing::error!(
                        alert_id = %alert.id,
                        strategy_id = strategy.id,
                        error = %e,
                        "Derived event publish failed"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(
                        alert_id = %alert.id,
                        strategy_id = strategy.id,
                        error = %e,
                        "Composite cycle failed, continuing with remaining strategies"
                    );
                }
            }
        }
        Ok(())
    }

    async fn schedule_retry(&self, input: &ProcessInput, alert: &Alert, strategy_id: Option<i64>) {
        let retry_times = input.retry_times + 2;
        if retry_times > self.config.max_retry {
            tracing::error!(
                alert_id = %alert.id,
                retry_times,
                "Retry cap reached, dropping work item"
            );
            return;
        }
        let countdown = (self.config.retry_countdown_base_secs
            * (i64::from(input.retry_times) + 1))
            .min(MAX_RETRY_COUNTDOWN_SECS);
        let payload = ProcessInput {
            alert_key: input.alert_key.clone(),
            alert_status: Some(alert.status),
            composite_strategy_ids: strategy_id.map(|id| vec![id]),
            retry_times,
        };
        if let Err(e) = self.delay_queue.apply_async(payload, countdown).await {
            tracing::error!(alert_id = %alert.id, error = %e, "Failed to schedule retry");
        }
    }
}
