use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use super::errors::ConsumerError;

// ============================================================================
// Idempotency Stores
// ============================================================================
//
// Remember which event keys have been handled. `first_seen` is an atomic
// check-and-mark: exactly one caller gets `true` for a given key.
//
// ============================================================================

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Mark `key` as seen; `true` if it was not seen before.
    ///
    /// The key is marked before the event is applied, so a copy arriving while
    /// the first one is still being applied counts as a duplicate. If that
    /// apply then fails and the key is forgotten, the copy is already gone.
    /// Copies of one key must therefore reach a single consumer at a time:
    /// the Kafka record key is the aggregate id, so they share a partition,
    /// and a partition has one reader per consumer group.
    async fn first_seen(&self, key: &str) -> Result<bool, ConsumerError>;

    /// Drop `key` so a redelivery is processed again
    async fn forget(&self, key: &str) -> Result<(), ConsumerError>;
}

/// Bounded in-process store; the oldest keys are evicted first
pub struct MemoryIdempotencyStore {
    capacity: usize,
    inner: Mutex<SeenKeys>,
}

#[derive(Default)]
struct SeenKeys {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl MemoryIdempotencyStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(SeenKeys::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|s| s.keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SeenKeys>, ConsumerError> {
        self.inner
            .lock()
            .map_err(|_| ConsumerError::IdempotencyUnavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn first_seen(&self, key: &str) -> Result<bool, ConsumerError> {
        let mut seen = self.lock()?;

        if !seen.keys.insert(key.to_string()) {
            return Ok(false);
        }
        seen.order.push_back(key.to_string());

        while seen.order.len() > self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.keys.remove(&oldest);
            }
        }
        Ok(true)
    }

    async fn forget(&self, key: &str) -> Result<(), ConsumerError> {
        let mut seen = self.lock()?;
        if seen.keys.remove(key) {
            seen.order.retain(|k| k != key);
        }
        Ok(())
    }
}

/// Shared store for several consumer instances, keys expire after `ttl_secs`
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    connection: MultiplexedConnection,
    prefix: String,
    ttl_secs: u64,
}

impl RedisIdempotencyStore {
    pub async fn connect(url: &str, ttl_secs: u64) -> Result<Self, ConsumerError> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        tracing::info!(ttl_secs, "✅ Connected to Redis idempotency store");

        Ok(Self {
            connection,
            prefix: "user-events:processed:".to_string(),
            ttl_secs,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn first_seen(&self, key: &str) -> Result<bool, ConsumerError> {
        let mut conn = self.connection.clone();

        // SET NX replies OK when the key was absent and nil otherwise
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn forget(&self, key: &str) -> Result<(), ConsumerError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_seen_only_once() {
        let store = MemoryIdempotencyStore::new(10);

        assert!(store.first_seen("USER_DELETED:1:t").await.unwrap());
        assert!(!store.first_seen("USER_DELETED:1:t").await.unwrap());
        assert!(store.first_seen("USER_DELETED:2:t").await.unwrap());
    }

    #[tokio::test]
    async fn test_forget_allows_reprocessing() {
        let store = MemoryIdempotencyStore::new(10);
        store.first_seen("k").await.unwrap();

        store.forget("k").await.unwrap();

        assert!(store.is_empty());
        assert!(store.first_seen("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = MemoryIdempotencyStore::new(2);
        for key in ["a", "b", "c"] {
            store.first_seen(key).await.unwrap();
        }

        assert_eq!(store.len(), 2);
        assert!(store.first_seen("a").await.unwrap());
        assert!(!store.first_seen("c").await.unwrap());
    }
}
