use crate::error::Result;
use crate::{keys, CoordinationStore};
use oxcorr_common::types::{Alert, AlertStatus, Truth};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sliding-window correlation state per `(strategy, dimension)` pair.
///
/// Each query config owns a sorted set of `(alert_id, update_time)`
/// entries (the alerts currently considered abnormal for that config),
/// and each `(strategy, dimension)` pair owns the serialized
/// `level -> bool` map from its previous evaluation. Callers must hold
/// the pair's composite lock for the duration of one evaluation cycle;
/// the individual operations are not atomic across keys.
pub struct CompositeStateStore {
    store: Arc<dyn CoordinationStore>,
    window_secs: i64,
    ttl_margin_secs: i64,
    detect_ttl_secs: i64,
}

impl CompositeStateStore {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        window_secs: i64,
        ttl_margin_secs: i64,
        detect_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            window_secs,
            ttl_margin_secs,
            detect_ttl_secs,
        }
    }

    fn key_ttl(&self) -> i64 {
        self.window_secs + self.ttl_margin_secs
    }

    /// Folds a matched alert into its config's abnormal set and returns
    /// the config's truth value.
    ///
    /// Abnormal alerts are upserted with `update_time` as the score, so
    /// remove-then-reinsert with a newer time is equivalent to a single
    /// insert. Non-abnormal alerts are removed; the config stays abnormal
    /// while other non-stale alerts remain.
    pub async fn update_matched(
        &self,
        strategy_id: i64,
        dimension_hash: &str,
        config_hash: &str,
        alert: &Alert,
        now: i64,
    ) -> Result<Truth> {
        let key = keys::check_set(strategy_id, dimension_hash, config_hash);
        self.store
            .zremrangebyscore(&key, i64::MIN, now - self.key_ttl())
            .await?;

        let truth = if alert.status == AlertStatus::Abnormal {
            self.store.zadd(&key, &alert.id, alert.update_time).await?;
            Truth::Abnormal
        } else {
            self.store.zrem(&key, &alert.id).await?;
            let remaining = self
                .store
                .zcount(&key, now - self.window_secs, i64::MAX)
                .await?;
            if remaining > 0 {
                Truth::Abnormal
            } else {
                Truth::Normal
            }
        };

        self.store.expire(&key, self.key_ttl()).await?;
        Ok(truth)
    }

    /// Truth value of a config the incoming alert did not match, read
    /// purely from the persisted window.
    pub async fn query_unmatched(
        &self,
        strategy_id: i64,
        dimension_hash: &str,
        config_hash: &str,
        now: i64,
    ) -> Result<Truth> {
        let key = keys::check_set(strategy_id, dimension_hash, config_hash);
        let count = self
            .store
            .zcount(&key, now - self.window_secs, i64::MAX)
            .await?;
        Ok(if count > 0 {
            Truth::Abnormal
        } else {
            Truth::Normal
        })
    }

    /// The `level -> bool` map persisted by the previous evaluation, or
    /// an empty map when absent or corrupt.
    pub async fn read_prior_detect(
        &self,
        strategy_id: i64,
        dimension_hash: &str,
    ) -> Result<BTreeMap<u8, bool>> {
        let key = keys::detect_result(strategy_id, dimension_hash);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(BTreeMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                tracing::warn!(
                    strategy_id,
                    dimension_hash,
                    error = %e,
                    "Discarding corrupt prior detect result"
                );
                Ok(BTreeMap::new())
            }
        }
    }

    pub async fn write_prior_detect(
        &self,
        strategy_id: i64,
        dimension_hash: &str,
        current: &BTreeMap<u8, bool>,
    ) -> Result<()> {
        let key = keys::detect_result(strategy_id, dimension_hash);
        let raw = serde_json::to_string(current)?;
        self.store
            .set(&key, &raw, Some(self.detect_ttl_secs))
            .await
    }

    /// Drops the prior-detect key and every check set of the pair. Called
    /// when a primary alert closes so a dead alert cannot keep composite
    /// state live.
    pub async fn clear(&self, strategy_id: i64, dimension_hash: &str) -> Result<()> {
        self.store
            .del(&keys::detect_result(strategy_id, dimension_hash))
            .await?;
        self.store
            .del_pattern(&keys::check_set_pattern(strategy_id, dimension_hash))
            .await?;
        Ok(())
    }
}
