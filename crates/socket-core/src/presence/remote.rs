use redis::AsyncCommands;

use event_protocol::Descriptor;

use crate::error::PresenceError;

const CONNECTIONS_KEY: &str = "connections";

/// Backed by a single Redis hash (`connections`), field = decimal id, value
/// = JSON-serialised [`Descriptor`] — a one-for-one port of the `HSET`/
/// `HDEL`/`HGET` calls in the Go source's `cache/redis.go`.
pub struct RedisPresence {
    client: redis::Client,
}

impl RedisPresence {
    pub fn new(redis_url: &str) -> Result<Self, PresenceError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| PresenceError::Backend(e.to_string()))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, PresenceError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PresenceError::Backend(e.to_string()))
    }

    pub(super) async fn online(&self, desc: Descriptor) -> Result<(), PresenceError> {
        let value = serde_json::to_string(&desc)?;
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(CONNECTIONS_KEY, desc.id.to_string(), value)
            .await
            .map_err(|e| PresenceError::Backend(e.to_string()))
    }

    pub(super) async fn offline(&self, id: i64) -> Result<(), PresenceError> {
        let mut conn = self.conn().await?;
        conn.hdel::<_, _, ()>(CONNECTIONS_KEY, id.to_string())
            .await
            .map_err(|e| PresenceError::Backend(e.to_string()))
    }

    pub(super) async fn find(&self, id: i64) -> Result<Option<Descriptor>, PresenceError> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .hget(CONNECTIONS_KEY, id.to_string())
            .await
            .map_err(|e| PresenceError::Backend(e.to_string()))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
