use crate::error::{Result, StoreError};
use crate::{CoordinationStore, LockToken};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::time::Duration;
use tokio::sync::Mutex;

const LOCK_POLL_INTERVAL_MS: u64 = 50;

/// Keys removed per sweep when deleting by pattern. The Redis adapter
/// relies on the same bound to keep SCAN+DEL from blocking the server.
const DEL_PATTERN_CHUNK: usize = 500;

struct StringEntry {
    value: String,
    expires_at: Option<i64>,
}

struct ZSetEntry {
    members: BTreeMap<String, i64>,
    expires_at: Option<i64>,
}

struct CounterEntry {
    value: i64,
    expires_at: i64,
}

struct LockEntry {
    token: String,
    expires_at: i64,
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, StringEntry>,
    zsets: HashMap<String, ZSetEntry>,
    counters: HashMap<String, CounterEntry>,
    locks: HashMap<String, LockEntry>,
}

/// In-process [`CoordinationStore`] with lazy TTL expiry.
///
/// Single-process only: locks serialize tasks within this process, not
/// across hosts. Command semantics mirror the Redis command set the
/// production adapter targets (SET NX/EX, ZADD upsert, ZCOUNT by score
/// range, INCR with first-write TTL).
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

fn live(expires_at: Option<i64>, now: i64) -> bool {
    expires_at.map_or(true, |at| at > now)
}

/// 16-character hex fencing token (8 random bytes).
fn generate_token() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = now_ts();
        let inner = self.inner.lock().await;
        Ok(inner
            .strings
            .get(key)
            .filter(|e| live(e.expires_at, now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<()> {
        let now = now_ts();
        let mut inner = self.inner.lock().await;
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: ttl_secs.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: i64) -> Result<bool> {
        let now = now_ts();
        let mut inner = self.inner.lock().await;
        if inner
            .strings
            .get(key)
            .is_some_and(|e| live(e.expires_at, now))
        {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl_secs),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.strings.remove(key);
        inner.zsets.remove(key);
        inner.counters.remove(key);
        Ok(())
    }

    async fn del_pattern(&self, pattern: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let matching: Vec<String> = inner
            .strings
            .keys()
            .chain(inner.zsets.keys())
            .chain(inner.counters.keys())
            .filter(|k| glob_match::glob_match(pattern, k))
            .cloned()
            .collect();
        let mut removed = 0u64;
        for chunk in matching.chunks(DEL_PATTERN_CHUNK) {
            for key in chunk {
                let hit = inner.strings.remove(key).is_some()
                    | inner.zsets.remove(key).is_some()
                    | inner.counters.remove(key).is_some();
                if hit {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()> {
        let at = now_ts() + ttl_secs;
        let mut inner = self.inner.lock().await;
        if let Some(e) = inner.strings.get_mut(key) {
            e.expires_at = Some(at);
        }
        if let Some(e) = inner.zsets.get_mut(key) {
            e.expires_at = Some(at);
        }
        if let Some(e) = inner.counters.get_mut(key) {
            e.expires_at = at;
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let now = now_ts();
        let mut inner = self.inner.lock().await;
        let entry = inner.zsets.entry(key.to_string()).or_insert_with(|| ZSetEntry {
            members: BTreeMap::new(),
            expires_at: None,
        });
        if !live(entry.expires_at, now) {
            entry.members.clear();
            entry.expires_at = None;
        }
        entry.members.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.zsets.get_mut(key) {
            entry.members.remove(member);
        }
        Ok(())
    }

    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let now = now_ts();
        let inner = self.inner.lock().await;
        Ok(inner
            .zsets
            .get(key)
            .filter(|e| live(e.expires_at, now))
            .map_or(0, |e| {
                e.members
                    .values()
                    .filter(|&&score| score >= min && score <= max)
                    .count() as u64
            }))
    }

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = entry.members.len();
        entry
            .members
            .retain(|_, &mut score| score < min || score > max);
        Ok((before - entry.members.len()) as u64)
    }

    async fn incr(&self, key: &str, ttl_secs: i64) -> Result<i64> {
        let now = now_ts();
        let mut inner = self.inner.lock().await;
        let entry = inner
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                value: 0,
                expires_at: now + ttl_secs,
            });
        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at = now + ttl_secs;
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn acquire_lock(&self, key: &str, ttl_secs: i64, wait_secs: i64) -> Result<LockToken> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_secs.max(0) as u64);
        loop {
            {
                let now = now_ts();
                let mut inner = self.inner.lock().await;
                let held = inner.locks.get(key).is_some_and(|l| l.expires_at > now);
                if !held {
                    let token = generate_token();
                    inner.locks.insert(
                        key.to_string(),
                        LockEntry {
                            token: token.clone(),
                            expires_at: now + ttl_secs,
                        },
                    );
                    return Ok(LockToken(token));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::LockContended {
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS)).await;
        }
    }

    async fn release_lock(&self, key: &str, token: &LockToken) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.locks.get(key).is_some_and(|l| l.token == token.0) {
            inner.locks.remove(key);
        }
        Ok(())
    }
}
