//! Composite alert correlation processor.
//!
//! Consumes already-normalized alerts, evaluates per-strategy boolean
//! expressions over correlated alert streams across a sliding time
//! window, emits derived alert events, and gates action dispatch with
//! first-fire and QoS semantics. Work arrives through
//! [`processor::CompositeProcessor::process`]; everything at the system
//! boundary (alert documents, strategy configuration, the event bus, the
//! delay queue) is reached through the traits below.

pub mod condition;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod matcher;
pub mod processor;
pub mod resolver;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use oxcorr_common::types::{ActionInstance, Alert, DerivedEvent, Strategy};
use std::collections::HashMap;

pub use processor::ProcessInput;

/// Read-through view of alert documents maintained by the upstream
/// detector.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Fetches the latest version of an alert by its work-item key.
    async fn get_by_key(&self, alert_key: &str) -> anyhow::Result<Option<Alert>>;

    /// Fetches an alert by its stable document id.
    async fn get_by_id(&self, alert_id: &str) -> anyhow::Result<Option<Alert>>;
}

/// Read-only strategy configuration cache, refreshed by an external
/// process. Reads may be stale by seconds.
#[async_trait]
pub trait StrategyCache: Send + Sync {
    /// Composite strategy ids watching a monitor strategy, keyed by
    /// business id.
    async fn composite_strategy_ids_by_strategy(
        &self,
        strategy_id: i64,
    ) -> anyhow::Result<HashMap<i64, Vec<i64>>>;

    /// Composite strategy ids watching a third-party alert name, keyed by
    /// business id.
    async fn composite_strategy_ids_by_alert_name(
        &self,
        alert_name: &str,
    ) -> anyhow::Result<HashMap<i64, Vec<i64>>>;

    async fn get_strategy_by_id(&self, strategy_id: i64) -> anyhow::Result<Option<Strategy>>;

    /// Whether the strategy is inside its alarm-time window, with a
    /// human-readable reason when it is not.
    fn in_alarm_time(&self, strategy: &Strategy) -> (bool, String);
}

/// Fire-and-forget publisher for derived alert events. The core never
/// reads the bus back; publish errors propagate so the work item is
/// re-delivered.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, events: Vec<DerivedEvent>) -> anyhow::Result<()>;
}

/// Downstream action sink fed by the dispatch gate after first-fire and
/// QoS checks.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, action: ActionInstance) -> anyhow::Result<()>;
}

/// Delay queue used for retry scheduling; re-invokes the processor with
/// the payload after `countdown_secs`.
#[async_trait]
pub trait DelayQueue: Send + Sync {
    async fn apply_async(&self, payload: ProcessInput, countdown_secs: i64) -> anyhow::Result<()>;
}

/// Monotonic unix-seconds clock. Integer precision is sufficient for
/// every window in the pipeline.
pub trait Clock: Send + Sync {
    fn now_ts(&self) -> i64;
}

/// Wall-clock [`Clock`] used outside of tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ts(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64)
    }
}
