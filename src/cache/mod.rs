pub mod keys;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

const TTL_JITTER_RATIO: f64 = 0.1;

/// JSON-over-Redis cache. Every failure degrades to a miss or a no-op.
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl RedisCache {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self::new(connection))
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let mut conn = self.connection.clone();
        let payload: Option<String> = match conn.get(key).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(key, error = %err, "redis get failed");
                return None;
            }
        };
        payload.and_then(|p| serde_json::from_str(&p).ok())
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        let Ok(payload) = serde_json::to_string(value) else {
            return;
        };
        let mut conn = self.connection.clone();
        let ttl_secs = apply_ttl_jitter(ttl).as_secs().max(1);
        if let Err(err) = conn.set_ex::<_, _, ()>(key, payload, ttl_secs).await {
            tracing::debug!(key, error = %err, "redis set failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        let mut conn = self.connection.clone();
        if let Err(err) = conn.del::<_, u64>(key).await {
            tracing::debug!(key, error = %err, "redis delete failed");
        }
    }
}

fn apply_ttl_jitter(ttl: Duration) -> Duration {
    let base_ms = ttl.as_millis() as f64;
    let factor = rand::rng().random_range(1.0 - TTL_JITTER_RATIO..=1.0 + TTL_JITTER_RATIO);
    Duration::from_millis((base_ms * factor).round().max(1.0) as u64)
}

/// In-process stand-in for Redis, used when no `REDIS_URL` is configured.
/// Entries hold serialized JSON so both backends behave identically.
#[derive(Default)]
pub struct LocalCache {
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((expires_at, payload)) if *expires_at > Instant::now() => {
                return serde_json::from_str(payload).ok();
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    pub fn set<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        if let Ok(payload) = serde_json::to_string(value) {
            let now = Instant::now();
            let mut entries = self.entries.lock();
            entries.retain(|_, (expires_at, _)| *expires_at > now);
            entries.insert(key.to_string(), (now + ttl, payload));
        }
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backing store for derived, recomputable values. Last write wins.
pub enum SummaryCache {
    Redis(RedisCache),
    Local(LocalCache),
}

impl SummaryCache {
    pub fn local() -> Self {
        Self::Local(LocalCache::new())
    }

    /// Connects to Redis when a URL is given, falling back to the local cache
    /// if the connection fails.
    pub async fn from_url(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            return Self::local();
        };
        match RedisCache::connect(url).await {
            Ok(cache) => Self::Redis(cache),
            Err(err) => {
                tracing::warn!(error = %err, "redis unavailable, using in-process summary cache");
                Self::local()
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Local(_) => "local",
        }
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        match self {
            Self::Redis(cache) => cache.get(key).await,
            Self::Local(cache) => cache.get(key),
        }
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        match self {
            Self::Redis(cache) => cache.set(key, value, ttl).await,
            Self::Local(cache) => cache.set(key, value, ttl),
        }
    }

    pub async fn delete(&self, key: &str) {
        match self {
            Self::Redis(cache) => cache.delete(key).await,
            Self::Local(cache) => cache.delete(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_ratio() {
        for _ in 0..50 {
            let ttl = apply_ttl_jitter(Duration::from_secs(300));
            assert!(ttl >= Duration::from_secs(270));
            assert!(ttl <= Duration::from_secs(330));
        }
    }

    #[test]
    fn local_cache_expires_entries() {
        let cache = LocalCache::new();
        cache.set("live", &42u32, Duration::from_secs(60));
        cache.set("stale", &7u32, Duration::ZERO);

        assert_eq!(cache.get::<u32>("live"), Some(42));
        assert_eq!(cache.get::<u32>("stale"), None);
        assert_eq!(cache.len(), 1);

        cache.delete("live");
        assert!(cache.is_empty());
    }

    #[test]
    fn local_cache_prunes_expired_entries_on_write() {
        let cache = LocalCache::new();
        for user in ["u1", "u2", "u3"] {
            cache.set(user, &1u32, Duration::ZERO);
        }
        // each write swept the previously expired users
        assert_eq!(cache.len(), 1);

        cache.set("u4", &4u32, Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<u32>("u4"), Some(4));
    }

    #[tokio::test]
    async fn summary_cache_without_url_is_local() {
        let cache = SummaryCache::from_url(None).await;
        assert_eq!(cache.backend(), "local");
        cache.set("k", &"v".to_string(), Duration::from_secs(1)).await;
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));
        cache.delete("k").await;
        assert_eq!(cache.get::<String>("k").await, None);
    }
}
