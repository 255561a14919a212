use crate::error::{CorrelateError, Result};
use crate::StrategyCache;
use oxcorr_common::types::Alert;
use std::sync::Arc;

/// Enumerates the composite strategies whose evaluation an alert could
/// affect.
pub struct StrategyResolver {
    cache: Arc<dyn StrategyCache>,
}

impl StrategyResolver {
    pub fn new(cache: Arc<dyn StrategyCache>) -> Self {
        Self { cache }
    }

    /// Candidate strategies for the alert, hydrated from the cache and
    /// ordered by id.
    ///
    /// An `allowlist` (the retry path) restricts candidates to the given
    /// ids. Candidates outside the alert's business are dropped; ids
    /// present in the index but absent from the cache are skipped with an
    /// `info` log.
    ///
    /// # Errors
    ///
    /// [`CorrelateError::ConfigIndexUnavailable`] when the configuration
    /// index cannot be queried; the whole cycle surfaces to the caller.
    pub async fn resolve(
        &self,
        alert: &Alert,
        allowlist: Option<&[i64]>,
    ) -> Result<Vec<oxcorr_common::types::Strategy>> {
        let ids_by_biz = match alert.strategy_id {
            Some(strategy_id) => self.cache.composite_strategy_ids_by_strategy(strategy_id).await,
            None => self.cache.composite_strategy_ids_by_alert_name(&alert.name).await,
        }
        .map_err(|e| CorrelateError::ConfigIndexUnavailable(e.to_string()))?;

        let mut ids = ids_by_biz.get(&alert.biz_id).cloned().unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();
        if let Some(allow) = allowlist {
            ids.retain(|id| allow.contains(id));
        }

        let mut strategies = Vec::with_capacity(ids.len());
        for id in ids {
            match self.cache.get_strategy_by_id(id).await {
                Ok(Some(strategy)) if strategy.biz_id == alert.biz_id => {
                    strategies.push(strategy);
                }
                Ok(Some(strategy)) => {
                    tracing::info!(
                        strategy_id = id,
                        strategy_biz = strategy.biz_id,
                        alert_biz = alert.biz_id,
                        "Dropping candidate outside the alert's business"
                    );
                }
                Ok(None) => {
                    tracing::info!(strategy_id = id, "Composite strategy missing from cache, skipping");
                }
                Err(e) => {
                    tracing::warn!(strategy_id = id, error = %e, "Failed to hydrate composite strategy, skipping");
                }
            }
        }
        Ok(strategies)
    }
}
