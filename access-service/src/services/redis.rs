use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};

/// Secondary key-value store used for the bounded audit fallback queue.
#[async_trait]
pub trait FallbackStore: Send + Sync {
    /// Push a value onto the head of the list at `key`, then trim the list
    /// to at most `max_len` entries.
    async fn push_trimmed(&self, key: &str, value: &str, max_len: i64)
        -> Result<(), anyhow::Error>;
    async fn queue_len(&self, key: &str) -> Result<i64, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl FallbackStore for RedisService {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }

    async fn push_trimmed(
        &self,
        key: &str,
        value: &str,
        max_len: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();

        // LPUSH + LTRIM in one round trip keeps the queue bounded on every push.
        redis::pipe()
            .cmd("LPUSH")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(max_len - 1)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to push to fallback queue: {}", e))
    }

    async fn queue_len(&self, key: &str) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read fallback queue length: {}", e))
    }
}

/// In-memory stand-in for tests.
pub struct MockFallbackStore {
    pub queues: std::sync::Mutex<std::collections::HashMap<String, Vec<String>>>,
}

impl Default for MockFallbackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFallbackStore {
    pub fn new() -> Self {
        Self {
            queues: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl FallbackStore for MockFallbackStore {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn push_trimmed(
        &self,
        key: &str,
        value: &str,
        max_len: i64,
    ) -> Result<(), anyhow::Error> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock queue mutex poisoned: {}", e))?;
        let queue = queues.entry(key.to_string()).or_default();
        queue.insert(0, value.to_string());
        queue.truncate(max_len.max(0) as usize);
        Ok(())
    }

    async fn queue_len(&self, key: &str) -> Result<i64, anyhow::Error> {
        let queues = self
            .queues
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock queue mutex poisoned: {}", e))?;
        Ok(queues.get(key).map(|q| q.len() as i64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_push_is_bounded() {
        let store = MockFallbackStore::new();
        for i in 0..5 {
            store
                .push_trimmed("audit:fallback", &format!("entry-{}", i), 3)
                .await
                .unwrap();
        }

        assert_eq!(store.queue_len("audit:fallback").await.unwrap(), 3);

        // Newest entries win; the oldest were trimmed.
        let queues = store.queues.lock().unwrap();
        let queue = queues.get("audit:fallback").unwrap();
        assert_eq!(queue[0], "entry-4");
        assert_eq!(queue[2], "entry-2");
    }
}
