/// Errors that can occur within the coordination-store layer.
///
/// Lock contention gets its own variant because the correlation pipeline
/// routes it to the retry scheduler while every other store failure is
/// swallowed at the per-strategy boundary.
///
/// # Examples
///
/// ```rust
/// use oxcorr_store::error::StoreError;
///
/// let err = StoreError::LockContended {
///     key: "correlate.lock.42.abc".to_string(),
/// };
/// assert!(err.to_string().contains("correlate.lock.42.abc"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The advisory lock could not be acquired within the wait budget.
    #[error("Store: lock contended on '{key}'")]
    LockContended { key: String },

    /// A store call exceeded its per-call timeout.
    #[error("Store: operation '{op}' timed out")]
    Timeout { op: &'static str },

    /// JSON serialization or deserialization of a stored value failed.
    #[error("Store: JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic store error for cases not covered by other variants.
    #[error("Store: {0}")]
    Other(String),
}

/// Convenience `Result` alias for coordination-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
