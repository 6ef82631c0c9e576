use super::ResultCache;
use async_trait::async_trait;
use coderealm_core::{Error, Result};
use core::time::Duration;
use redis::{AsyncCommands, aio::ConnectionManager};

/// Result cache backed by Redis string keys with `EX` expiry.
///
/// [`ConnectionManager`] reconnects on its own after a dropped connection,
/// so a write that fails during an outage does not poison later writes.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = redis::Client::open(uri).map_err(cache_error)?;
        let conn = client.get_connection_manager().await.map_err(cache_error)?;
        Ok(Self { conn })
    }

    /// Sends `PING` and returns the server reply.
    pub async fn ping(&self) -> Result<String> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(cache_error)
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        // `EX 0` is rejected by Redis.
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(cache_error)
    }
}

fn cache_error(err: redis::RedisError) -> Error {
    Error::CacheWrite {
        reason: err.to_string(),
    }
}
