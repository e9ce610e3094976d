//! Presence registry.
//!
//! Short-TTL mapping `user_id -> {client_endpoint, last_seen, status}`.
//! A check-in upserts with a refreshed TTL; an expired record reads as
//! absent. The registry is the only writer of presence records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{Mutex, RwLock};

use freerange_core::{NotifyError, Presence};

#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Upsert a presence record with a fresh TTL.
    async fn set(&self, presence: &Presence, ttl: Duration) -> Result<(), NotifyError>;

    /// The live record, or `None` once expired.
    async fn get(&self, user_id: &str) -> Result<Option<Presence>, NotifyError>;

    /// Availability plus the optional client endpoint hint.
    async fn is_available(&self, user_id: &str) -> Result<(bool, Option<String>), NotifyError>;
}

pub struct RedisPresenceRegistry {
    conn: Arc<RwLock<ConnectionManager>>,
    prefix: String,
}

impl RedisPresenceRegistry {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, NotifyError> {
        let client = redis::Client::open(redis_url).map_err(|e| NotifyError::Queue {
            message: format!("redis client: {}", e),
        })?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| NotifyError::Queue {
                message: format!("redis connection: {}", e),
            })?;
        Ok(Self {
            conn: Arc::new(RwLock::new(manager)),
            prefix: prefix.into(),
        })
    }

    fn key(&self, user_id: &str) -> String {
        format!("{}:presence:{}", self.prefix, user_id)
    }

    fn redis_err(e: redis::RedisError) -> NotifyError {
        NotifyError::Queue {
            message: format!("presence: {}", e),
        }
    }
}

#[async_trait]
impl PresenceRegistry for RedisPresenceRegistry {
    async fn set(&self, presence: &Presence, ttl: Duration) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(presence)?;
        let mut conn = self.conn.write().await;
        let _: () = conn
            .set_ex(self.key(&presence.user_id), payload, ttl.as_secs())
            .await
            .map_err(Self::redis_err)?;
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<Presence>, NotifyError> {
        let mut conn = self.conn.write().await;
        let raw: Option<String> = conn
            .get(self.key(user_id))
            .await
            .map_err(Self::redis_err)?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn is_available(&self, user_id: &str) -> Result<(bool, Option<String>), NotifyError> {
        match self.get(user_id).await? {
            Some(presence) => Ok((true, presence.client_endpoint)),
            None => Ok((false, None)),
        }
    }
}

#[derive(Default)]
pub struct MemoryPresenceRegistry {
    entries: Mutex<HashMap<String, (Presence, Instant)>>,
}

impl MemoryPresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceRegistry for MemoryPresenceRegistry {
    async fn set(&self, presence: &Presence, ttl: Duration) -> Result<(), NotifyError> {
        self.entries.lock().await.insert(
            presence.user_id.clone(),
            (presence.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<Presence>, NotifyError> {
        let mut entries = self.entries.lock().await;
        match entries.get(user_id) {
            Some((presence, expires)) if *expires > Instant::now() => Ok(Some(presence.clone())),
            Some(_) => {
                entries.remove(user_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn is_available(&self, user_id: &str) -> Result<(bool, Option<String>), NotifyError> {
        match self.get(user_id).await? {
            Some(presence) => Ok((true, presence.client_endpoint)),
            None => Ok((false, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_presence_reads_as_absent() {
        let registry = MemoryPresenceRegistry::new();
        let presence = Presence::check_in("u1", "a1", Some("https://client.example".into()));

        registry.set(&presence, Duration::from_secs(300)).await.unwrap();
        let (available, endpoint) = registry.is_available("u1").await.unwrap();
        assert!(available);
        assert_eq!(endpoint.as_deref(), Some("https://client.example"));

        registry.set(&presence, Duration::from_secs(0)).await.unwrap();
        assert!(registry.get("u1").await.unwrap().is_none());
        let (available, endpoint) = registry.is_available("u1").await.unwrap();
        assert!(!available);
        assert!(endpoint.is_none());
    }
}
