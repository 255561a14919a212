//! Coordination-store abstraction for the correlation pipeline.
//!
//! The default implementation ([`memory::MemoryStore`]) keeps everything
//! in process and is used by tests and embedded deployments; production
//! deployments adapt the same trait onto a shared Redis. The sliding
//! window and prior-detect state machines of the pipeline are built on
//! top of it in [`check::CompositeStateStore`].

pub mod check;
pub mod error;
pub mod keys;
pub mod memory;


use async_trait::async_trait;
use error::Result;

/// Fencing token returned by a successful lock acquisition.
///
/// Release is a no-op unless the caller still holds the token that
/// currently owns the lock, so a holder whose lock already expired cannot
/// release a newer holder's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

/// Shared coordination store: TTL'd strings, sorted sets, counters, and
/// advisory named locks with bounded wait.
///
/// Implementations must be safe to share across tasks (`Send + Sync`);
/// every call is a suspension point with a bounded per-call timeout.
/// Scores and TTLs are unix seconds.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Sets `key` to `value`, optionally with a TTL in seconds.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<()>;

    /// Sets `key` only if it does not already exist (NX semantics).
    /// Returns whether this call created the key.
    async fn set_nx(&self, key: &str, value: &str, ttl_secs: i64) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Deletes every key matching a glob pattern. Implementations must
    /// chunk the deletion to bound blocking. Returns the number of keys
    /// removed.
    async fn del_pattern(&self, pattern: &str) -> Result<u64>;

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()>;

    /// Upserts `member` with `score` into the sorted set at `key`.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()>;

    async fn zrem(&self, key: &str, member: &str) -> Result<()>;

    /// Counts members with `min <= score <= max`.
    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64>;

    /// Removes members with `min <= score <= max`. Returns the number
    /// removed.
    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64>;

    /// Atomically increments the counter at `key`, setting its TTL on
    /// first increment. Returns the post-increment value.
    async fn incr(&self, key: &str, ttl_secs: i64) -> Result<i64>;

    /// Acquires the advisory lock named `key`, waiting up to `wait_secs`.
    ///
    /// # Errors
    ///
    /// [`error::StoreError::LockContended`] when the lock is still held
    /// after the wait budget is exhausted.
    async fn acquire_lock(&self, key: &str, ttl_secs: i64, wait_secs: i64) -> Result<LockToken>;

    /// Releases the lock if `token` still owns it; otherwise does nothing.
    async fn release_lock(&self, key: &str, token: &LockToken) -> Result<()>;
}
