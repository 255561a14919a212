use oxcorr_store::error::StoreError;

/// Errors that can occur within the correlation pipeline.
///
/// The per-strategy loop matches on the variant: lock contention is routed
/// to the retry scheduler, publish failures re-raise to the outer loop so
/// the work item is re-delivered, and everything else is logged and
/// swallowed at the strategy boundary.
///
/// # Examples
///
/// ```rust
/// use oxcorr_correlate::error::CorrelateError;
///
/// let err = CorrelateError::ConfigMiss { strategy_id: 42 };
/// assert!(err.to_string().contains("42"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CorrelateError {
    /// A composite or action lock was still held after the wait budget.
    #[error("Correlate: lock contended on '{key}'")]
    LockContended { key: String },

    /// The configuration index could not be queried at all.
    #[error("Correlate: configuration index unavailable: {0}")]
    ConfigIndexUnavailable(String),

    /// A referenced strategy id is absent from the configuration cache.
    #[error("Correlate: strategy {strategy_id} missing from configuration cache")]
    ConfigMiss { strategy_id: i64 },

    /// A boolean expression failed to compile or evaluate.
    #[error("Correlate: expression evaluation failed: {0}")]
    EvalFailed(String),

    /// A coordination-store call failed for a reason other than lock
    /// contention.
    #[error("Correlate: {0}")]
    Store(StoreError),

    /// The event publisher rejected a derived event batch.
    #[error("Correlate: event publish failed: {0}")]
    Publish(String),

    /// Generic pipeline error for cases not covered by other variants.
    #[error("Correlate: {0}")]
    Other(String),
}

impl From<StoreError> for CorrelateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockContended { key } => CorrelateError::LockContended { key },
            other => CorrelateError::Store(other),
        }
    }
}

/// Convenience `Result` alias for correlation operations.
pub type Result<T> = std::result::Result<T, CorrelateError>;
